//! External engine: MATPOWER running inside a GNU Octave process.
//!
//! The session speaks to Octave over piped stdin/stdout. Every request is
//! wrapped in `try ... catch` and terminated by a sentinel line so each call
//! succeeds or fails on its own.

use crate::error::EngineError;
use crate::idx::*;
use crate::matpower::{branch_to_row, bus_to_row, fmt_num, gen_to_row, gencost_rows};
use crate::mpc::MPC;
use crate::solve::{Engine, SolveMode, SolveResult};
use log::{debug, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const OK: &str = "__NEMFLOW_OK__";
const ERR: &str = "__NEMFLOW_ERR__";
const VAL: &str = "__NEMFLOW_VAL__";

/// Request/response interface to a numerical workspace.
pub trait Session {
    /// Evaluates `script` and returns what it printed.
    fn eval(&mut self, script: &str) -> Result<String, EngineError>;

    fn put_matrix(&mut self, name: &str, rows: &[Vec<f64>]) -> Result<(), EngineError>;

    /// Reads a real matrix, or any expression that evaluates to one.
    fn get_matrix(&mut self, name: &str) -> Result<Vec<Vec<f64>>, EngineError>;

    fn get_scalar(&mut self, name: &str) -> Result<f64, EngineError> {
        let m = self.get_matrix(name)?;
        match m.as_slice() {
            [row] if row.len() == 1 => Ok(row[0]),
            _ => Err(EngineError::Value {
                name: name.to_string(),
                message: "expected a scalar".to_string(),
            }),
        }
    }

    /// Ends the session. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Octave child process.
pub struct OctaveSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl OctaveSession {
    pub fn start(program: &Path) -> Result<Self, EngineError> {
        info!("starting {}", program.display());
        let mut child = Command::new(program)
            .args(["--quiet", "--no-gui", "--norc"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Start {
                program: program.to_path_buf(),
                source,
            })?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        Ok(Self {
            child: Some(child),
            stdin,
            stdout,
        })
    }

    fn send(&mut self, text: &str) -> Result<(), EngineError> {
        let stdin = self.stdin.as_mut().ok_or(EngineError::SessionClosed)?;
        stdin.write_all(text.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, EngineError> {
        let stdout = self.stdout.as_mut().ok_or(EngineError::SessionClosed)?;
        let mut line = String::new();
        if stdout.read_line(&mut line)? == 0 {
            return Err(EngineError::SessionClosed);
        }
        Ok(line.trim_end().to_string())
    }
}

impl Session for OctaveSession {
    fn eval(&mut self, script: &str) -> Result<String, EngineError> {
        debug!("octave> {}", script);
        let request = format!(
            "try\n{}\ndisp('{}');\ncatch err\ndisp(['{} ' strrep(err.message, char(10), ' ')]);\nend\nfflush(stdout);\n",
            script, OK, ERR
        );
        self.send(&request)?;

        let mut output = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == OK {
                return Ok(output.join("\n"));
            }
            if let Some(message) = line.strip_prefix(ERR) {
                return Err(EngineError::Call {
                    command: script.to_string(),
                    message: message.trim().to_string(),
                });
            }
            output.push(line);
        }
    }

    fn put_matrix(&mut self, name: &str, rows: &[Vec<f64>]) -> Result<(), EngineError> {
        self.eval(&format!("{} = {};", name, matrix_literal(rows)))?;
        Ok(())
    }

    fn get_matrix(&mut self, name: &str) -> Result<Vec<Vec<f64>>, EngineError> {
        let output = self.eval(&format!(
            "disp(['{} ' mat2str(double({}), 17)]);",
            VAL, name
        ))?;
        let text = output
            .lines()
            .find_map(|l| l.strip_prefix(VAL))
            .ok_or_else(|| EngineError::Value {
                name: name.to_string(),
                message: "no value printed".to_string(),
            })?;
        parse_mat2str(name, text)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };
        if let Some(mut stdin) = self.stdin.take() {
            // the process may already be gone
            let _ = stdin.write_all(b"exit\n");
        }
        self.stdout = None;
        let status = child.wait()?;
        debug!("octave exited with {}", status);
        Ok(())
    }
}

impl Drop for OctaveSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("octave session was not closed, killing it");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Renders rows as an Octave matrix literal.
fn matrix_literal(rows: &[Vec<f64>]) -> String {
    if rows.is_empty() {
        return "zeros(0, 0)".to_string();
    }
    let rows: Vec<String> = rows
        .iter()
        .map(|r| r.iter().map(|&v| fmt_num(v)).collect::<Vec<_>>().join(" "))
        .collect();
    format!("[{}]", rows.join("; "))
}

fn parse_value(name: &str, token: &str) -> Result<f64, EngineError> {
    match token {
        "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => token.parse::<f64>().map_err(|_| EngineError::Value {
            name: name.to_string(),
            message: format!("bad number {:?}", token),
        }),
    }
}

/// Parses the output of Octave's `mat2str`.
pub(crate) fn parse_mat2str(name: &str, text: &str) -> Result<Vec<Vec<f64>>, EngineError> {
    let text = text.trim();
    if text.starts_with("zeros(") || text == "[]" {
        return Ok(Vec::new());
    }
    let body = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    body.split(';')
        .map(|row| {
            row.split_whitespace()
                .map(|token| parse_value(name, token))
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect()
}

/// Opens a new session for every solve.
pub type Connect = Box<dyn FnMut() -> Result<Box<dyn Session>, EngineError>>;

/// Engine that exchanges the case with MATPOWER through a [`Session`].
pub struct ExternalEngine {
    connect: Connect,
    matpower_path: Option<PathBuf>,
}

impl ExternalEngine {
    pub fn new(connect: Connect, matpower_path: Option<PathBuf>) -> Self {
        Self {
            connect,
            matpower_path,
        }
    }

    /// MATPOWER in an Octave started from `program`.
    pub fn octave(program: PathBuf, matpower_path: Option<PathBuf>) -> Self {
        Self::new(
            Box::new(move || {
                let session = OctaveSession::start(&program)?;
                Ok(Box::new(session) as Box<dyn Session>)
            }),
            matpower_path,
        )
    }
}

impl Engine for ExternalEngine {
    fn name(&self) -> &str {
        "matpower"
    }

    fn solve(&mut self, case: &MPC, mode: SolveMode) -> Result<SolveResult, EngineError> {
        let mut session = (self.connect)()?;
        let result = exchange(session.as_mut(), case, mode, self.matpower_path.as_deref());
        let closed = session.close();
        if let Err(err) = &closed {
            warn!("closing engine session: {}", err);
        }
        let result = result?;
        closed?;
        Ok(result)
    }
}

/// Case as MATPOWER sees it: storage set-points become load and renewable
/// units are pinned to their set-point.
fn engine_case(case: &MPC) -> MPC {
    let mut mpc = case.clone();
    for s in case.storage.iter().filter(|s| s.status) {
        if let Some(b) = mpc.bus.iter_mut().find(|b| b.bus_i == s.bus) {
            b.pd += s.p_mw;
        }
    }
    for g in mpc.gen.iter_mut().filter(|g| g.kind.is_renewable()) {
        g.pmin = g.pg;
        g.pmax = g.pg;
    }
    mpc
}

fn check_schema(
    table: &'static str,
    rows: &[Vec<f64>],
    expected_rows: usize,
    min_cols: usize,
) -> Result<(), EngineError> {
    if rows.len() != expected_rows {
        return Err(EngineError::Rows {
            table,
            expected: expected_rows,
            found: rows.len(),
        });
    }
    if let Some(found) = rows.iter().map(|r| r.len()).find(|&n| n < min_cols) {
        return Err(EngineError::Schema {
            table,
            expected: min_cols,
            found,
        });
    }
    Ok(())
}

fn exchange(
    session: &mut dyn Session,
    case: &MPC,
    mode: SolveMode,
    matpower_path: Option<&Path>,
) -> Result<SolveResult, EngineError> {
    if let Some(path) = matpower_path {
        let path = path.display().to_string().replace('\'', "''");
        session.eval(&format!("addpath(genpath('{}'));", path))?;
    }

    let mpc = engine_case(case);
    session.put_matrix("nf_base", &[vec![mpc.base_mva]])?;
    session.put_matrix("nf_bus", &mpc.bus.iter().map(bus_to_row).collect::<Vec<_>>())?;
    session.put_matrix("nf_gen", &mpc.gen.iter().map(gen_to_row).collect::<Vec<_>>())?;
    session.put_matrix(
        "nf_branch",
        &mpc.branch
            .iter()
            .map(|br| branch_to_row(br, false))
            .collect::<Vec<_>>(),
    )?;
    session.put_matrix("nf_gencost", &gencost_rows(&mpc.gen))?;

    session.eval(
        "mpc = struct('version', '2', 'baseMVA', nf_base, 'bus', nf_bus, 'gen', nf_gen, \
         'branch', nf_branch, 'gencost', nf_gencost);",
    )?;
    let call = match mode {
        SolveMode::PowerFlow => "runpf",
        SolveMode::OptimalPowerFlow => "runopf",
    };
    session.eval(&format!(
        "nf_opt = mpoption('verbose', 0, 'out.all', 0); results = {}(mpc, nf_opt);",
        call
    ))?;

    let success = session.get_scalar("results.success")?;
    session.eval(
        "nf_its = 0; if isfield(results, 'iterations'), nf_its = results.iterations; \
         elseif isfield(results, 'raw'), nf_its = results.raw.output.iterations; end",
    )?;
    let iterations = session.get_scalar("nf_its")?;

    let bus = session.get_matrix("results.bus")?;
    let gen = session.get_matrix("results.gen")?;
    let branch = session.get_matrix("results.branch")?;
    check_schema("bus", &bus, case.bus.len(), BUS_RESULT_COLS)?;
    check_schema("gen", &gen, case.gen.len(), GEN_RESULT_COLS)?;
    check_schema("branch", &branch, case.branch.len(), BRANCH_RESULT_COLS)?;

    let objective = match mode {
        SolveMode::PowerFlow => None,
        SolveMode::OptimalPowerFlow => Some(session.get_scalar("results.f")?),
    };

    let mut solved = case.clone();
    for (b, row) in solved.bus.iter_mut().zip(&bus) {
        b.vm = row[VM];
        b.va = row[VA];
    }
    for (g, row) in solved.gen.iter_mut().zip(&gen) {
        g.pg = row[PG];
        g.qg = row[QG];
    }
    for (br, row) in solved.branch.iter_mut().zip(&branch) {
        br.pf = row[PF];
        br.qf = row[QF];
        br.pt = row[PT];
        br.qt = row[QT];
    }

    Ok(SolveResult {
        mode,
        case: solved,
        converged: success == 1.0,
        iterations: iterations.max(0.0) as usize,
        objective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case3;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        scripts: Vec<String>,
        closed: usize,
    }

    /// Session that answers from canned workspace values.
    struct FakeSession {
        log: Rc<RefCell<Log>>,
        values: HashMap<String, Vec<Vec<f64>>>,
        fail_on: Option<&'static str>,
    }

    impl Session for FakeSession {
        fn eval(&mut self, script: &str) -> Result<String, EngineError> {
            self.log.borrow_mut().scripts.push(script.to_string());
            match self.fail_on {
                Some(pattern) if script.contains(pattern) => Err(EngineError::Call {
                    command: script.to_string(),
                    message: "Undefined function".to_string(),
                }),
                _ => Ok(String::new()),
            }
        }

        fn put_matrix(&mut self, name: &str, rows: &[Vec<f64>]) -> Result<(), EngineError> {
            self.values.insert(name.to_string(), rows.to_vec());
            Ok(())
        }

        fn get_matrix(&mut self, name: &str) -> Result<Vec<Vec<f64>>, EngineError> {
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::Value {
                    name: name.to_string(),
                    message: "undefined".to_string(),
                })
        }

        fn close(&mut self) -> Result<(), EngineError> {
            self.log.borrow_mut().closed += 1;
            Ok(())
        }
    }

    fn solved_values(case: &MPC, branch_cols: usize) -> HashMap<String, Vec<Vec<f64>>> {
        let mut values = HashMap::new();
        values.insert("results.success".to_string(), vec![vec![1.0]]);
        values.insert("nf_its".to_string(), vec![vec![3.0]]);
        let mut bus: Vec<Vec<f64>> = case.bus.iter().map(bus_to_row).collect();
        bus.iter_mut().for_each(|r| r[VM] = 0.98);
        values.insert("results.bus".to_string(), bus);
        let mut gen: Vec<Vec<f64>> = case.gen.iter().map(gen_to_row).collect();
        gen[0][PG] = 101.5;
        values.insert("results.gen".to_string(), gen);
        let branch = case
            .branch
            .iter()
            .map(|br| {
                let mut row = branch_to_row(br, true);
                row[PF] = 50.0;
                row[PT] = -49.5;
                row.truncate(branch_cols);
                row
            })
            .collect();
        values.insert("results.branch".to_string(), branch);
        values
    }

    fn engine(
        log: &Rc<RefCell<Log>>,
        values: HashMap<String, Vec<Vec<f64>>>,
        fail_on: Option<&'static str>,
    ) -> ExternalEngine {
        let log = Rc::clone(log);
        ExternalEngine::new(
            Box::new(move || {
                Ok(Box::new(FakeSession {
                    log: Rc::clone(&log),
                    values: values.clone(),
                    fail_on,
                }) as Box<dyn Session>)
            }),
            Some(PathBuf::from("/opt/matpower")),
        )
    }

    #[test]
    fn results_are_read_back_by_column() -> anyhow::Result<()> {
        let case = case3();
        let log = Rc::new(RefCell::new(Log::default()));
        let mut engine = engine(&log, solved_values(&case, BRANCH_RESULT_COLS), None);

        let result = engine.solve(&case, SolveMode::PowerFlow)?;
        assert!(result.converged);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.case.gen[0].pg, 101.5);
        assert_eq!(result.case.bus[2].vm, 0.98);
        assert_eq!(result.case.branch[1].pt, -49.5);
        assert_eq!(log.borrow().closed, 1);
        assert!(log.borrow().scripts[0].contains("/opt/matpower"));
        Ok(())
    }

    #[test]
    fn short_result_rows_are_rejected() {
        let case = case3();
        let log = Rc::new(RefCell::new(Log::default()));
        let mut engine = engine(&log, solved_values(&case, BRANCH_COLS), None);

        let err = engine.solve(&case, SolveMode::PowerFlow).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Schema {
                table: "branch",
                expected: BRANCH_RESULT_COLS,
                found: BRANCH_COLS
            }
        ));
        assert_eq!(log.borrow().closed, 1);
    }

    #[test]
    fn session_is_closed_when_a_call_fails() {
        let case = case3();
        let log = Rc::new(RefCell::new(Log::default()));
        let mut engine = engine(&log, HashMap::new(), Some("runopf"));

        let err = engine.solve(&case, SolveMode::OptimalPowerFlow).unwrap_err();
        assert!(matches!(err, EngineError::Call { .. }));
        assert_eq!(log.borrow().closed, 1);
    }

    #[test]
    fn storage_is_exchanged_as_load() {
        let mut case = case3();
        case.storage.push(crate::mpc::Storage {
            bus: 2,
            power_mw: 10.0,
            energy_mwh: 20.0,
            p_mw: 5.0,
            status: true,
        });
        let mpc = engine_case(&case);
        assert_eq!(mpc.bus[1].pd, 105.0);
    }

    #[test]
    fn mat2str_output() -> anyhow::Result<()> {
        assert_eq!(
            parse_mat2str("x", "[1 2.5;-Inf 4]")?,
            vec![vec![1.0, 2.5], vec![f64::NEG_INFINITY, 4.0]]
        );
        assert_eq!(parse_mat2str("x", "7")?, vec![vec![7.0]]);
        assert!(parse_mat2str("x", "zeros(0,13)")?.is_empty());
        assert!(parse_mat2str("x", "[1 abc]").is_err());
        assert_eq!(matrix_literal(&[vec![1.0, f64::INFINITY]]), "[1 Inf]");
        Ok(())
    }
}
