//! Scripted in-memory client library and waiter for behavioural tests.
//!
//! The library understands a tiny SQL dialect:
//!
//! - `SELECT <expr>, <expr> [AS name], ...` with integer, decimal, quoted
//!   string, `NULL` and `?` expressions, producing one row
//! - `SELECT * FROM series(N)`: one `n` column, rows 1..=N
//! - `SELECT * FROM broken(N)`: like `series`, then the connection drops
//! - `SELECT HUGE`: a column too wide to allocate a bind buffer for
//! - `SELECT WIDE`: a value longer than its declared column width
//! - statements starting with `FAIL`: server error 1064
//! - statements starting with `KILL`: connection lost (2013)
//! - anything else: one affected row, no result set
//!
//! Every phase stays pending for a configurable number of rounds.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use asupersync::{CancelReason, Cx, Outcome};
use coio_mysql::client::{
    ConnectParams, ConnectTarget, FetchStatus, NextResult, ParamBind, RawRow, RawSocket,
};
use coio_mysql::types::column_flags;
use coio_mysql::{
    ClientHandle, ClientLibrary, ConnectOptions, Connection, Error, FieldMetadata, FieldType,
    Interest, Pollable, ResultHandle, ResultSlot, StatementHandle, Step, Waiter, cancel_requested,
};
use std::collections::VecDeque;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const ER_PARSE_ERROR: u32 = 1064;
pub const ER_BAD_FIELD_ERROR: u32 = 1054;
pub const ER_ACCESS_DENIED_ERROR: u32 = 1045;
pub const CR_SERVER_LOST: u32 = 2013;
pub const CR_PARAMS_NOT_BOUND: u32 = 2031;

pub type FakeConnection = Connection<FakeHandle, ScriptWaiter>;

pub fn block_on(f: impl Future<Output = ()>) {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f);
}

/// Connect or panic.
pub async fn open(
    cx: &Cx,
    library: &FakeLibrary,
    waiter: &ScriptWaiter,
    options: ConnectOptions,
) -> FakeConnection {
    match Connection::connect_with(cx, library, options, waiter.clone()).await {
        Outcome::Ok(conn) => conn,
        Outcome::Err(e) => panic!("connect failed: {e}"),
        Outcome::Cancelled(r) => panic!("connect cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("connect panicked: {p:?}"),
    }
}

pub fn expect_ok<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("unexpected cancellation: {r:?}"),
        Outcome::Panicked(p) => panic!("unexpected panic: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error, got a value"),
        Outcome::Cancelled(r) => panic!("unexpected cancellation: {r:?}"),
        Outcome::Panicked(p) => panic!("unexpected panic: {p:?}"),
    }
}

// ==================== Waiter ====================

#[derive(Default)]
struct WaitControl {
    calls: AtomicUsize,
    /// 0 = never
    cancel_at: AtomicUsize,
    sticky: AtomicBool,
    stall_at: AtomicUsize,
    cancel_task_at: AtomicUsize,
}

/// Reports every wait as immediately ready, except where a test injects a
/// cancellation or a stall, or the task's context has been cancelled.
/// Clones share their script.
#[derive(Clone, Default)]
pub struct ScriptWaiter {
    control: Arc<WaitControl>,
}

impl ScriptWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits performed so far.
    pub fn calls(&self) -> usize {
        self.control.calls.load(Ordering::SeqCst)
    }

    /// Cancel the `n`-th wait from now, once.
    pub fn cancel_after(&self, n: usize) {
        self.control
            .cancel_at
            .store(self.calls() + n, Ordering::SeqCst);
        self.control.sticky.store(false, Ordering::SeqCst);
    }

    /// Cancel the `n`-th wait from now and every wait after it.
    pub fn cancel_from(&self, n: usize) {
        self.control
            .cancel_at
            .store(self.calls() + n, Ordering::SeqCst);
        self.control.sticky.store(true, Ordering::SeqCst);
    }

    /// Request cancellation of the waiting task's context on the `n`-th wait
    /// from now. The request stays set, as it does under the runtime.
    pub fn cancel_task_after(&self, n: usize) {
        self.control
            .cancel_task_at
            .store(self.calls() + n, Ordering::SeqCst);
    }

    /// Never complete the `n`-th wait from now.
    pub fn stall_after(&self, n: usize) {
        self.control
            .stall_at
            .store(self.calls() + n, Ordering::SeqCst);
    }
}

impl Waiter for ScriptWaiter {
    fn wait_ready(
        &self,
        cx: &Cx,
        _socket: RawSocket,
        interest: Interest,
        _timeout: Duration,
    ) -> impl Future<Output = Outcome<Interest, Error>> {
        let call = self.control.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.control.cancel_task_at.load(Ordering::SeqCst) == call {
            cx.set_cancel_requested(true);
        }
        let requested = cancel_requested(cx);
        let cancel_at = self.control.cancel_at.load(Ordering::SeqCst);
        let sticky = self.control.sticky.load(Ordering::SeqCst);
        let stall_at = self.control.stall_at.load(Ordering::SeqCst);
        let cancel = cancel_at != 0 && (call == cancel_at || (sticky && call > cancel_at));
        let stall = stall_at != 0 && call == stall_at;
        async move {
            if let Some(reason) = requested {
                return Outcome::Cancelled(reason);
            }
            if stall {
                std::future::pending::<()>().await;
            }
            if cancel {
                return Outcome::Cancelled(CancelReason::user("injected"));
            }
            Outcome::Ok(interest.io())
        }
    }
}

// ==================== Library state ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedConnect {
    pub target: String,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
    pub flags: u32,
}

pub type BoundParam = (FieldType, Option<Vec<u8>>);

pub struct LibState {
    /// Pending rounds every phase goes through before finishing
    pub rounds: usize,
    pub init_fails: bool,
    pub connect_error: Option<(u32, String)>,
    pub reject_user: Option<String>,
    pub fail_stmt_close: bool,

    pub handles_live: usize,
    pub handles_released: usize,
    pub goodbyes: usize,
    pub statements_live: usize,
    /// Statement closes issued, finished or not
    pub statements_close_started: usize,
    pub statements_closed: usize,
    pub results_live: usize,
    pub connects: Vec<RecordedConnect>,
    pub change_users: Vec<(String, Option<String>)>,
    pub bound: Vec<Vec<BoundParam>>,
    next_thread_id: u64,
    sockets: (UnixStream, UnixStream),
}

impl LibState {
    pub fn socket(&self) -> RawSocket {
        self.sockets.0.as_raw_fd()
    }
}

/// In-memory phased client library.
#[derive(Clone)]
pub struct FakeLibrary {
    state: Arc<Mutex<LibState>>,
}

impl Default for FakeLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLibrary {
    pub fn new() -> Self {
        let sockets = UnixStream::pair().expect("socket pair");
        Self {
            state: Arc::new(Mutex::new(LibState {
                rounds: 0,
                init_fails: false,
                connect_error: None,
                reject_user: None,
                fail_stmt_close: false,
                handles_live: 0,
                handles_released: 0,
                goodbyes: 0,
                statements_live: 0,
                statements_close_started: 0,
                statements_closed: 0,
                results_live: 0,
                connects: Vec::new(),
                change_users: Vec::new(),
                bound: Vec::new(),
                next_thread_id: 1,
                sockets,
            })),
        }
    }

    pub fn with_rounds(rounds: usize) -> Self {
        let lib = Self::new();
        lib.state().rounds = rounds;
        lib
    }

    pub fn state(&self) -> MutexGuard<'_, LibState> {
        self.state.lock().unwrap()
    }
}

impl ClientLibrary for FakeLibrary {
    type Handle = FakeHandle;

    fn init(&self) -> Option<FakeHandle> {
        let mut st = self.state();
        if st.init_fails {
            return None;
        }
        st.handles_live += 1;
        Some(FakeHandle {
            lib: Arc::clone(&self.state),
            socket: st.socket(),
            error: ErrorState::default(),
            left: 0,
            connecting: None,
            changing: None,
            pending: VecDeque::new(),
            current: None,
            lost: Arc::new(AtomicBool::new(false)),
            thread_id: 0,
        })
    }
}

// ==================== SQL evaluation ====================

#[derive(Debug, Clone, Default)]
struct ErrorState {
    errno: u32,
    message: String,
    sqlstate: Option<String>,
}

impl ErrorState {
    fn set(&mut self, code: u32, message: impl Into<String>, sqlstate: &str) {
        self.errno = code;
        self.message = message.into();
        self.sqlstate = Some(sqlstate.to_string());
    }

    fn clear(&mut self) {
        *self = ErrorState::default();
    }
}

#[derive(Debug, Clone)]
struct Table {
    fields: Vec<FieldMetadata>,
    rows: VecDeque<RawRow>,
    broken: bool,
}

#[derive(Debug, Clone)]
enum Eval {
    Rows(Table),
    Affected(u64),
    Fail(u32, String, &'static str),
}

/// Split on `sep` outside single-quoted strings.
fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_quote = false;
            }
        } else if c == '\'' {
            in_quote = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn count_placeholders(sql: &str) -> usize {
    split_outside_quotes(sql, '?').len() - 1
}

/// Decode a single-quoted literal the way the server does.
fn unquote(literal: &str) -> Option<Vec<u8>> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            out.push(match bytes[i + 1] {
                b'0' => 0,
                b'n' => b'\n',
                b'r' => b'\r',
                b'Z' => 0x1a,
                other => other,
            });
            i += 2;
        } else if b == b'\'' && bytes.get(i + 1) == Some(&b'\'') {
            out.push(b'\'');
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Some(out)
}

fn split_alias(expr: &str) -> (&str, Option<&str>) {
    let upper = expr.to_ascii_uppercase();
    match upper.rfind(" AS ") {
        Some(at) if !expr[at..].contains('\'') => (expr[..at].trim(), Some(expr[at + 4..].trim())),
        _ => (expr, None),
    }
}

fn syntax_error(near: &str) -> Eval {
    Eval::Fail(
        ER_PARSE_ERROR,
        format!("You have an error in your SQL syntax near '{near}'"),
        "42000",
    )
}

fn table_function(rest: &str) -> Option<(usize, bool)> {
    let rest = rest.trim();
    let (name, arg) = rest.split_once('(')?;
    let n: usize = arg.strip_suffix(')')?.trim().parse().ok()?;
    match name.trim().to_ascii_lowercase().as_str() {
        "series" => Some((n, false)),
        "broken" => Some((n, true)),
        _ => None,
    }
}

fn eval(sql: &str, params: &[BoundParam]) -> Eval {
    let sql = sql.trim();
    let upper = sql.to_ascii_uppercase();
    if upper.starts_with("FAIL") {
        return syntax_error(sql);
    }
    if upper.starts_with("KILL") {
        return Eval::Fail(
            CR_SERVER_LOST,
            "Lost connection to MySQL server during query".to_string(),
            "HY000",
        );
    }
    let Some(list) = upper.strip_prefix("SELECT ").map(|_| &sql[7..]) else {
        return Eval::Affected(1);
    };

    if let Some(rest) = list.trim().strip_prefix("* FROM ").or_else(|| list.trim().strip_prefix("* from ")) {
        let Some((n, broken)) = table_function(rest) else {
            return syntax_error(rest);
        };
        let fields = vec![FieldMetadata::new("n", FieldType::Long).max_length(11)];
        let rows = (1..=n).map(|i| vec![Some(i.to_string().into_bytes())]).collect();
        return Eval::Rows(Table {
            fields,
            rows,
            broken,
        });
    }

    let mut params = params.iter();
    let mut fields = Vec::new();
    let mut row = Vec::new();
    for expr in split_outside_quotes(list, ',') {
        let (expr, alias) = split_alias(expr.trim());
        let (field, payload) = match eval_expr(expr, &mut params) {
            Ok(v) => v,
            Err(fail) => return fail,
        };
        let mut field = field;
        if let Some(alias) = alias {
            field.name = alias.to_string();
        }
        fields.push(field);
        row.push(payload);
    }
    Eval::Rows(Table {
        fields,
        rows: VecDeque::from([row]),
        broken: false,
    })
}

fn eval_expr<'a>(
    expr: &str,
    params: &mut impl Iterator<Item = &'a BoundParam>,
) -> Result<(FieldMetadata, Option<Vec<u8>>), Eval> {
    if expr == "?" {
        let Some((ty, payload)) = params.next() else {
            return Err(Eval::Fail(
                CR_PARAMS_NOT_BOUND,
                "No data supplied for parameters in prepared statement".to_string(),
                "HY000",
            ));
        };
        let text = payload.as_ref().map(|bytes| match ty {
            FieldType::Tiny => bytes[0].to_string().into_bytes(),
            FieldType::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                f64::from_ne_bytes(raw).to_string().into_bytes()
            }
            _ => bytes.clone(),
        });
        let field_type = match ty {
            FieldType::String => FieldType::VarString,
            other => *other,
        };
        let width = text.as_ref().map_or(0, Vec::len);
        return Ok((FieldMetadata::new("?", field_type).max_length(width), text));
    }

    let upper = expr.to_ascii_uppercase();
    match upper.as_str() {
        "NULL" => return Ok((FieldMetadata::new("NULL", FieldType::Null), None)),
        "HUGE" => {
            return Ok((
                FieldMetadata::new("HUGE", FieldType::VarString).max_length(usize::MAX),
                Some(b"x".to_vec()),
            ));
        }
        "WIDE" => {
            return Ok((
                FieldMetadata::new("WIDE", FieldType::VarString).max_length(2),
                Some(b"abcdef".to_vec()),
            ));
        }
        _ => {}
    }

    if let Some(bytes) = unquote(expr) {
        let name = String::from_utf8_lossy(&bytes).into_owned();
        let width = bytes.len();
        return Ok((
            FieldMetadata::new(name, FieldType::VarString).max_length(width),
            Some(bytes),
        ));
    }

    if expr.contains('.') && expr.parse::<f64>().is_ok() {
        return Ok((
            FieldMetadata::new(expr, FieldType::NewDecimal).max_length(expr.len()),
            Some(expr.as_bytes().to_vec()),
        ));
    }

    if let Ok(n) = expr.parse::<i128>() {
        let field = if i32::try_from(n).is_ok() {
            FieldMetadata::new(expr, FieldType::Long).max_length(11)
        } else if i64::try_from(n).is_ok() {
            FieldMetadata::new(expr, FieldType::LongLong).max_length(20)
        } else if u64::try_from(n).is_ok() {
            FieldMetadata::new(expr, FieldType::LongLong)
                .flags(column_flags::UNSIGNED)
                .max_length(20)
        } else {
            return Err(syntax_error(expr));
        };
        return Ok((field, Some(expr.as_bytes().to_vec())));
    }

    Err(Eval::Fail(
        ER_BAD_FIELD_ERROR,
        format!("Unknown column '{expr}' in 'field list'"),
        "42S22",
    ))
}

/// Count down one round; `true` while the phase is still pending.
fn advance(left: &mut usize) -> bool {
    *left = left.saturating_sub(1);
    *left > 0
}

fn pending<T>() -> Step<T> {
    Step::pending(Interest::WRITABLE)
}

// ==================== Connection handle ====================

pub struct FakeHandle {
    lib: Arc<Mutex<LibState>>,
    socket: RawSocket,
    error: ErrorState,
    left: usize,
    connecting: Option<RecordedConnect>,
    changing: Option<(String, Option<String>, Option<String>)>,
    /// Results of statements after the current one
    pending: VecDeque<Eval>,
    current: Option<Eval>,
    /// Set by a streamed result whose connection dropped mid-fetch
    lost: Arc<AtomicBool>,
    thread_id: u64,
}

impl FakeHandle {
    fn rounds(&self) -> usize {
        self.lib.lock().unwrap().rounds
    }

    fn begin(&mut self) {
        self.left = self.rounds() + 1;
        self.error.clear();
        self.lost.store(false, Ordering::SeqCst);
    }

    fn finish_connect(&mut self) -> bool {
        let mut st = self.lib.lock().unwrap();
        if let Some(record) = self.connecting.take() {
            st.connects.push(record);
        }
        if let Some((code, message)) = st.connect_error.clone() {
            drop(st);
            self.error.set(code, message, "HY000");
            return false;
        }
        self.thread_id = st.next_thread_id;
        st.next_thread_id += 1;
        true
    }

    fn finish_change_user(&mut self) -> bool {
        let Some((user, _password, database)) = self.changing.take() else {
            return false;
        };
        let mut st = self.lib.lock().unwrap();
        st.change_users.push((user.clone(), database));
        if st.reject_user.as_deref() == Some(user.as_str()) {
            drop(st);
            self.error.set(
                ER_ACCESS_DENIED_ERROR,
                format!("Access denied for user '{user}'"),
                "28000",
            );
            return false;
        }
        true
    }

    fn finish_query(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(Eval::Fail(code, message, state)) => {
                self.pending.clear();
                self.error.set(code, message, state);
                false
            }
            Some(result) => {
                self.current = Some(result);
                true
            }
            None => {
                self.error.set(ER_PARSE_ERROR, "Query was empty", "42000");
                false
            }
        }
    }

    fn finish_next_result(&mut self) -> NextResult {
        self.current = None;
        match self.pending.pop_front() {
            None => NextResult::Done,
            Some(Eval::Fail(code, message, state)) => {
                self.pending.clear();
                self.error.set(code, message, state);
                NextResult::Error
            }
            Some(result) => {
                self.current = Some(result);
                NextResult::More
            }
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        let mut st = self.lib.lock().unwrap();
        st.handles_live -= 1;
        st.handles_released += 1;
    }
}

impl Pollable for FakeHandle {
    fn socket(&self) -> RawSocket {
        self.socket
    }
}

impl ClientHandle for FakeHandle {
    type Result = FakeResult;
    type Statement = FakeStatement;

    fn connect_start(&mut self, params: &ConnectParams<'_>) -> Step<bool> {
        let target = match params.target {
            ConnectTarget::Tcp { host, port } => format!("tcp:{host}:{port}"),
            ConnectTarget::Unix(path) => format!("unix:{}", path.display()),
        };
        self.connecting = Some(RecordedConnect {
            target,
            user: params.user.to_string(),
            password: params.password.map(str::to_string),
            database: params.database.map(str::to_string),
            flags: params.flags,
        });
        self.begin();
        self.connect_cont(Interest::empty())
    }

    fn connect_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_connect())
    }

    fn change_user_start(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Step<bool> {
        self.changing = Some((
            user.to_string(),
            password.map(str::to_string),
            database.map(str::to_string),
        ));
        self.begin();
        self.change_user_cont(Interest::empty())
    }

    fn change_user_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_change_user())
    }

    fn query_start(&mut self, sql: &str) -> Step<bool> {
        self.current = None;
        self.pending = split_outside_quotes(sql, ';')
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| eval(s, &[]))
            .collect();
        self.begin();
        self.query_cont(Interest::empty())
    }

    fn query_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_query())
    }

    fn use_result(&mut self) -> Option<FakeResult> {
        let Some(Eval::Rows(table)) = self.current.take() else {
            return None;
        };
        self.lib.lock().unwrap().results_live += 1;
        Some(FakeResult {
            lib: Arc::clone(&self.lib),
            socket: self.socket,
            table,
            left: 0,
            lost: Arc::clone(&self.lost),
        })
    }

    fn field_count(&self) -> usize {
        match &self.current {
            Some(Eval::Rows(table)) => table.fields.len(),
            _ => 0,
        }
    }

    fn affected_rows(&self) -> u64 {
        match &self.current {
            Some(Eval::Affected(n)) => *n,
            _ => 0,
        }
    }

    fn next_result_start(&mut self) -> Step<NextResult> {
        self.begin();
        self.next_result_cont(Interest::empty())
    }

    fn next_result_cont(&mut self, _ready: Interest) -> Step<NextResult> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_next_result())
    }

    fn stmt_init(&mut self) -> Option<FakeStatement> {
        self.lib.lock().unwrap().statements_live += 1;
        Some(FakeStatement {
            lib: Arc::clone(&self.lib),
            socket: self.socket,
            error: ErrorState::default(),
            left: 0,
            sql: String::new(),
            param_count: 0,
            params: None,
            table: None,
            affected: 0,
            slots: Vec::new(),
        })
    }

    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn escape(&self, to: &mut [u8], from: &[u8]) -> usize {
        let mut n = 0;
        for &b in from {
            let escaped: Option<u8> = match b {
                0 => Some(b'0'),
                b'\n' => Some(b'n'),
                b'\r' => Some(b'r'),
                b'\\' => Some(b'\\'),
                b'\'' => Some(b'\''),
                b'"' => Some(b'"'),
                0x1a => Some(b'Z'),
                _ => None,
            };
            match escaped {
                Some(c) => {
                    to[n] = b'\\';
                    to[n + 1] = c;
                    n += 2;
                }
                None => {
                    to[n] = b;
                    n += 1;
                }
            }
        }
        to[n] = 0;
        n
    }

    fn errno(&self) -> u32 {
        if self.lost.load(Ordering::SeqCst) {
            return CR_SERVER_LOST;
        }
        self.error.errno
    }

    fn error(&self) -> String {
        if self.lost.load(Ordering::SeqCst) {
            return "Lost connection to MySQL server during query".to_string();
        }
        self.error.message.clone()
    }

    fn sqlstate(&self) -> Option<String> {
        self.error.sqlstate.clone()
    }

    fn close(self) {
        self.lib.lock().unwrap().goodbyes += 1;
    }
}

// ==================== Streamed result ====================

pub struct FakeResult {
    lib: Arc<Mutex<LibState>>,
    socket: RawSocket,
    table: Table,
    left: usize,
    lost: Arc<AtomicBool>,
}

impl Drop for FakeResult {
    fn drop(&mut self) {
        self.lib.lock().unwrap().results_live -= 1;
    }
}

impl Pollable for FakeResult {
    fn socket(&self) -> RawSocket {
        self.socket
    }
}

impl ResultHandle for FakeResult {
    fn fields(&self) -> &[FieldMetadata] {
        &self.table.fields
    }

    fn fetch_row_start(&mut self) -> Step<Option<RawRow>> {
        self.left = self.lib.lock().unwrap().rounds + 1;
        self.fetch_row_cont(Interest::empty())
    }

    fn fetch_row_cont(&mut self, _ready: Interest) -> Step<Option<RawRow>> {
        if advance(&mut self.left) {
            return pending();
        }
        let row = self.table.rows.pop_front();
        if row.is_none() && self.table.broken {
            self.lost.store(true, Ordering::SeqCst);
        }
        Step::Done(row)
    }
}

// ==================== Prepared statement ====================

pub struct FakeStatement {
    lib: Arc<Mutex<LibState>>,
    socket: RawSocket,
    error: ErrorState,
    left: usize,
    sql: String,
    param_count: usize,
    params: Option<Vec<BoundParam>>,
    table: Option<Table>,
    affected: u64,
    slots: Vec<ResultSlot>,
}

impl FakeStatement {
    fn begin(&mut self) {
        self.left = self.lib.lock().unwrap().rounds + 1;
        self.error.clear();
    }

    fn finish_prepare(&mut self) -> bool {
        if self.sql.trim().to_ascii_uppercase().starts_with("FAIL") {
            self.error.set(
                ER_PARSE_ERROR,
                format!("You have an error in your SQL syntax near '{}'", self.sql),
                "42000",
            );
            return false;
        }
        self.param_count = count_placeholders(&self.sql);
        true
    }

    fn finish_execute(&mut self) -> bool {
        let params = match (&self.params, self.param_count) {
            (Some(params), _) => params.clone(),
            (None, 0) => Vec::new(),
            (None, _) => {
                self.error.set(
                    CR_PARAMS_NOT_BOUND,
                    "No data supplied for parameters in prepared statement",
                    "HY000",
                );
                return false;
            }
        };
        match eval(&self.sql, &params) {
            Eval::Rows(table) => {
                self.affected = table.rows.len() as u64;
                self.table = Some(table);
                true
            }
            Eval::Affected(n) => {
                self.affected = n;
                self.table = None;
                true
            }
            Eval::Fail(code, message, state) => {
                self.error.set(code, message, state);
                false
            }
        }
    }

    fn finish_fetch(&mut self) -> FetchStatus {
        let Some(table) = &mut self.table else {
            return FetchStatus::NoData;
        };
        let Some(row) = table.rows.pop_front() else {
            return FetchStatus::NoData;
        };
        let mut truncated = false;
        for (slot, value) in self.slots.iter_mut().zip(&row) {
            slot.store(value.as_deref());
            truncated |= slot.is_truncated();
        }
        if truncated {
            FetchStatus::Truncated
        } else {
            FetchStatus::Row
        }
    }

    fn finish_close(&mut self) -> bool {
        let mut st = self.lib.lock().unwrap();
        st.statements_closed += 1;
        if st.fail_stmt_close {
            drop(st);
            self.error.set(CR_SERVER_LOST, "Lost connection to MySQL server", "HY000");
            return false;
        }
        true
    }
}

impl Drop for FakeStatement {
    fn drop(&mut self) {
        self.lib.lock().unwrap().statements_live -= 1;
    }
}

impl Pollable for FakeStatement {
    fn socket(&self) -> RawSocket {
        self.socket
    }
}

impl StatementHandle for FakeStatement {
    fn prepare_start(&mut self, sql: &str) -> Step<bool> {
        self.sql = sql.to_string();
        self.begin();
        self.prepare_cont(Interest::empty())
    }

    fn prepare_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_prepare())
    }

    fn param_count(&self) -> usize {
        self.param_count
    }

    fn bind_params(&mut self, binds: &[ParamBind<'_>]) -> bool {
        if binds.len() != self.param_count {
            self.error.set(
                CR_PARAMS_NOT_BOUND,
                "No data supplied for parameters in prepared statement",
                "HY000",
            );
            return false;
        }
        let copied: Vec<BoundParam> = binds
            .iter()
            .map(|b| {
                let payload = (!b.is_null).then(|| b.buffer.to_vec());
                (b.buffer_type, payload)
            })
            .collect();
        self.lib.lock().unwrap().bound.push(copied.clone());
        self.params = Some(copied);
        true
    }

    fn execute_start(&mut self) -> Step<bool> {
        self.begin();
        self.execute_cont(Interest::empty())
    }

    fn execute_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_execute())
    }

    fn result_metadata(&mut self) -> Option<Vec<FieldMetadata>> {
        self.table.as_ref().map(|t| t.fields.clone())
    }

    fn bind_result(&mut self, slots: Vec<ResultSlot>) -> bool {
        let expected = self.table.as_ref().map_or(0, |t| t.fields.len());
        let ok = slots.len() == expected;
        self.slots = slots;
        ok
    }

    fn result_slots(&self) -> &[ResultSlot] {
        &self.slots
    }

    fn take_result_binds(&mut self) -> Vec<ResultSlot> {
        std::mem::take(&mut self.slots)
    }

    fn fetch_start(&mut self) -> Step<FetchStatus> {
        self.begin();
        self.fetch_cont(Interest::empty())
    }

    fn fetch_cont(&mut self, _ready: Interest) -> Step<FetchStatus> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_fetch())
    }

    fn free_result(&mut self) -> bool {
        self.table = None;
        true
    }

    fn close_start(&mut self) -> Step<bool> {
        self.lib.lock().unwrap().statements_close_started += 1;
        self.begin();
        self.close_cont(Interest::empty())
    }

    fn close_cont(&mut self, _ready: Interest) -> Step<bool> {
        if advance(&mut self.left) {
            return pending();
        }
        Step::Done(self.finish_close())
    }

    fn affected_rows(&self) -> u64 {
        self.affected
    }

    fn errno(&self) -> u32 {
        self.error.errno
    }

    fn error(&self) -> String {
        self.error.message.clone()
    }

    fn sqlstate(&self) -> Option<String> {
        self.error.sqlstate.clone()
    }
}
