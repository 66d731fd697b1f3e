//! MATPOWER case file reader and writer.
//!
//! Understands the `mpc.baseMVA`, `mpc.bus`, `mpc.gen`, `mpc.branch` and
//! `mpc.gencost` fields of version 2 case files, plus two extension
//! fields written by this crate: `mpc.gen_kind` (one category code per
//! generator) and `mpc.storage` (bus, power, energy, set-point, status).

use crate::error::CaseError;
use crate::idx::*;
use crate::mpc::{Branch, Bus, BusType, Gen, GenCost, GenKind, Storage, MPC};
use std::fmt::Write;
use std::fs;
use std::path::Path;

const STORAGE_COLS: usize = 5;

/// Reads a MATPOWER `.m` case file.
pub fn read_case_file(path: &Path) -> Result<MPC, CaseError> {
    let content = fs::read_to_string(path).map_err(|source| CaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    parse_case_str(&name, &content)
}

/// Writes a case as a MATPOWER function file.
pub fn write_case_file(path: &Path, mpc: &MPC) -> Result<(), CaseError> {
    fs::write(path, write_case(mpc)).map_err(|source| CaseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses MATPOWER case file content. `name` is used unless the content
/// declares `function mpc = <name>`.
pub fn parse_case_str(name: &str, content: &str) -> Result<MPC, CaseError> {
    let mut mpc = MPC {
        name: name.to_string(),
        ..Default::default()
    };

    let mut bus_rows = None;
    let mut gen_rows = None;
    let mut branch_rows = None;
    let mut gencost_rows = None;
    let mut kind_rows = None;
    let mut storage_rows = None;

    let mut lines = content.lines().enumerate().map(|(i, l)| (i + 1, l));
    while let Some((line_no, line)) = lines.next() {
        let trimmed = strip_comment(line).trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("function") {
            if let Some(fname) = rest.split('=').nth(1) {
                let fname = fname.trim().trim_end_matches(';').trim();
                if !fname.is_empty() {
                    mpc.name = fname.to_string();
                }
            }
            continue;
        }

        let Some(field) = trimmed.strip_prefix("mpc.") else {
            continue;
        };
        let key: String = field
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let Some(rhs) = field.split_once('=').map(|(_, r)| r) else {
            continue;
        };

        match key.as_str() {
            "baseMVA" => {
                let v = rhs.trim().trim_end_matches(';').trim();
                mpc.base_mva = parse_number(v, line_no)?;
            }
            "bus" => bus_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            "gen" => gen_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            "branch" => branch_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            "gencost" => gencost_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            "gen_kind" => kind_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            "storage" => storage_rows = Some(parse_matrix(rhs, line_no, &mut lines)?),
            _ => {}
        }
    }

    let bus_rows = bus_rows.ok_or(CaseError::MissingSection("bus"))?;
    for (row, (line, values)) in bus_rows.iter().enumerate() {
        mpc.bus.push(bus_from_row(values, row, *line)?);
    }
    for (row, (line, values)) in gen_rows.unwrap_or_default().iter().enumerate() {
        mpc.gen.push(gen_from_row(values, row, *line)?);
    }
    for (row, (line, values)) in branch_rows.unwrap_or_default().iter().enumerate() {
        mpc.branch.push(branch_from_row(values, row, *line)?);
    }

    // Rows beyond ng hold reactive power costs, which are not used.
    let ng = mpc.gen.len();
    for (row, (line, values)) in gencost_rows.unwrap_or_default().iter().enumerate().take(ng) {
        mpc.gen[row].cost = Some(gencost_from_row(values, row, *line)?);
    }

    let kinds: Vec<f64> = kind_rows
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(_, values)| values)
        .collect();
    for (g, code) in mpc.gen.iter_mut().zip(kinds) {
        g.kind = kind_from_code(code);
    }

    for (row, (line, values)) in storage_rows.unwrap_or_default().iter().enumerate() {
        check_cols("storage", row, values, STORAGE_COLS)?;
        mpc.storage.push(Storage {
            bus: whole_number(values[0], "storage bus", *line)?,
            power_mw: values[1],
            energy_mwh: values[2],
            p_mw: values[3],
            status: values[4] != 0.0,
        });
    }

    Ok(mpc)
}

fn strip_comment(line: &str) -> &str {
    match line.find('%') {
        Some(k) => &line[..k],
        None => line,
    }
}

fn parse_number(token: &str, line: usize) -> Result<f64, CaseError> {
    match token {
        "Inf" | "inf" => Ok(f64::INFINITY),
        "-Inf" | "-inf" => Ok(f64::NEG_INFINITY),
        "NaN" | "nan" => Ok(f64::NAN),
        _ => token.parse::<f64>().map_err(|_| CaseError::Parse {
            line,
            message: format!("invalid number {:?}", token),
        }),
    }
}

/// Collects the rows of a `[ ... ];` matrix literal that starts in `rhs`.
fn parse_matrix<'a>(
    rhs: &str,
    header_line: usize,
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<Vec<(usize, Vec<f64>)>, CaseError> {
    let Some((_, first)) = rhs.split_once('[') else {
        return Err(CaseError::Parse {
            line: header_line,
            message: "expected matrix literal".to_string(),
        });
    };

    let mut rows = Vec::new();
    let mut text = first.to_string();
    let mut line_no = header_line;
    loop {
        let body = strip_comment(&text);
        let (body, done) = match body.find(']') {
            Some(k) => (&body[..k], true),
            None => (body, false),
        };
        for chunk in body.split(';') {
            let values = chunk
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| parse_number(s, line_no))
                .collect::<Result<Vec<f64>, CaseError>>()?;
            if !values.is_empty() {
                rows.push((line_no, values));
            }
        }
        if done {
            return Ok(rows);
        }
        match lines.next() {
            Some((n, l)) => {
                text = l.to_string();
                line_no = n;
            }
            None => {
                return Err(CaseError::Parse {
                    line: header_line,
                    message: "unterminated matrix".to_string(),
                })
            }
        }
    }
}

fn check_cols(
    table: &'static str,
    row: usize,
    values: &[f64],
    expected: usize,
) -> Result<(), CaseError> {
    if values.len() < expected {
        return Err(CaseError::Schema {
            table,
            row,
            expected,
            found: values.len(),
        });
    }
    Ok(())
}

/// Reads a bus number or count, which must be a non-negative integer.
fn whole_number(value: f64, field: &str, line: usize) -> Result<usize, CaseError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(CaseError::Parse {
            line,
            message: format!("{} must be a non-negative integer, found {}", field, value),
        })
    }
}

pub(crate) fn bus_from_row(a: &[f64], row: usize, line: usize) -> Result<Bus, CaseError> {
    check_cols("bus", row, a, BUS_COLS)?;
    Ok(Bus {
        bus_i: whole_number(a[BUS_I], "bus number", line)?,
        bus_type: BusType::from_code(a[BUS_TYPE]).ok_or_else(|| CaseError::Parse {
            line,
            message: format!("invalid bus type {}", a[BUS_TYPE]),
        })?,
        pd: a[PD],
        qd: a[QD],
        gs: a[GS],
        bs: a[BS],
        area: a[BUS_AREA] as usize,
        vm: a[VM],
        va: a[VA],
        base_kv: a[BASE_KV],
        zone: a[ZONE] as usize,
        vmax: a[VMAX],
        vmin: a[VMIN],
    })
}

pub(crate) fn gen_from_row(a: &[f64], row: usize, line: usize) -> Result<Gen, CaseError> {
    check_cols("gen", row, a, GEN_COLS)?;
    Ok(Gen {
        gen_bus: whole_number(a[GEN_BUS], "generator bus", line)?,
        pg: a[PG],
        qg: a[QG],
        qmax: a[QMAX],
        qmin: a[QMIN],
        vg: a[VG],
        mbase: a[MBASE],
        status: a[GEN_STATUS] > 0.0,
        pmax: a[PMAX],
        pmin: a[PMIN],
        kind: GenKind::Conventional,
        cost: None,
    })
}

pub(crate) fn branch_from_row(a: &[f64], row: usize, line: usize) -> Result<Branch, CaseError> {
    check_cols("branch", row, a, BRANCH_COLS)?;
    let result = |i: usize| if a.len() > i { a[i] } else { 0.0 };
    Ok(Branch {
        f_bus: whole_number(a[F_BUS], "from bus", line)?,
        t_bus: whole_number(a[T_BUS], "to bus", line)?,
        br_r: a[BR_R],
        br_x: a[BR_X],
        br_b: a[BR_B],
        rate_a: a[RATE_A],
        rate_b: a[RATE_B],
        rate_c: a[RATE_C],
        tap: a[TAP],
        shift: a[SHIFT],
        status: a[BR_STATUS] != 0.0,
        angmin: a[ANGMIN],
        angmax: a[ANGMAX],
        pf: result(PF),
        qf: result(QF),
        pt: result(PT),
        qt: result(QT),
    })
}

fn gencost_from_row(a: &[f64], row: usize, line: usize) -> Result<GenCost, CaseError> {
    check_cols("gencost", row, a, COST)?;
    let n = whole_number(a[NCOST], "NCOST", line)?;
    let too_long = || CaseError::Parse {
        line,
        message: format!("NCOST {} is out of range", n),
    };
    match whole_number(a[MODEL], "cost model", line)? {
        PW_LINEAR => {
            let end = n
                .checked_mul(2)
                .and_then(|k| k.checked_add(COST))
                .ok_or_else(too_long)?;
            check_cols("gencost", row, a, end)?;
            let points = a[COST..end]
                .chunks(2)
                .map(|pair| (pair[0], pair[1]))
                .collect();
            Ok(GenCost::PwLinear {
                startup: a[STARTUP],
                shutdown: a[SHUTDOWN],
                points,
            })
        }
        POLYNOMIAL => {
            let end = n.checked_add(COST).ok_or_else(too_long)?;
            check_cols("gencost", row, a, end)?;
            Ok(GenCost::Polynomial {
                startup: a[STARTUP],
                shutdown: a[SHUTDOWN],
                coeffs: a[COST..end].to_vec(),
            })
        }
        model => Err(CaseError::Parse {
            line,
            message: format!("unknown cost model {}", model),
        }),
    }
}

fn kind_from_code(code: f64) -> GenKind {
    match code as i64 {
        1 => GenKind::Solar,
        2 => GenKind::Wind,
        _ => GenKind::Conventional,
    }
}

fn kind_code(kind: GenKind) -> f64 {
    match kind {
        GenKind::Conventional => 0.0,
        GenKind::Solar => 1.0,
        GenKind::Wind => 2.0,
    }
}

pub(crate) fn bus_to_row(b: &Bus) -> Vec<f64> {
    vec![
        b.bus_i as f64,
        b.bus_type.code(),
        b.pd,
        b.qd,
        b.gs,
        b.bs,
        b.area as f64,
        b.vm,
        b.va,
        b.base_kv,
        b.zone as f64,
        b.vmax,
        b.vmin,
    ]
}

pub(crate) fn gen_to_row(g: &Gen) -> Vec<f64> {
    vec![
        g.gen_bus as f64,
        g.pg,
        g.qg,
        g.qmax,
        g.qmin,
        g.vg,
        g.mbase,
        if g.status { 1.0 } else { 0.0 },
        g.pmax,
        g.pmin,
    ]
}

pub(crate) fn branch_to_row(br: &Branch, with_results: bool) -> Vec<f64> {
    let mut row = vec![
        br.f_bus as f64,
        br.t_bus as f64,
        br.br_r,
        br.br_x,
        br.br_b,
        br.rate_a,
        br.rate_b,
        br.rate_c,
        br.tap,
        br.shift,
        if br.status { 1.0 } else { 0.0 },
        br.angmin,
        br.angmax,
    ];
    if with_results {
        row.extend([br.pf, br.qf, br.pt, br.qt]);
    }
    row
}

/// Gencost rows for every generator, padded to a common width. Generators
/// without a cost get a zero polynomial.
pub(crate) fn gencost_rows(gen: &[Gen]) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = gen
        .iter()
        .map(|g| match &g.cost {
            Some(GenCost::Polynomial {
                startup,
                shutdown,
                coeffs,
            }) => {
                let mut row = vec![POLYNOMIAL as f64, *startup, *shutdown, coeffs.len() as f64];
                row.extend(coeffs);
                row
            }
            Some(GenCost::PwLinear {
                startup,
                shutdown,
                points,
            }) => {
                let mut row = vec![PW_LINEAR as f64, *startup, *shutdown, points.len() as f64];
                for (p, f) in points {
                    row.extend([*p, *f]);
                }
                row
            }
            None => vec![POLYNOMIAL as f64, 0.0, 0.0, 2.0, 0.0, 0.0],
        })
        .collect();
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    rows.iter_mut().for_each(|r| r.resize(width, 0.0));
    rows
}

/// Formats a number so that both MATLAB/Octave and this parser read it back
/// exactly.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", v)
    }
}

fn write_matrix(out: &mut String, field: &str, rows: &[Vec<f64>]) {
    let _ = writeln!(out, "mpc.{} = [", field);
    for row in rows {
        let cells: Vec<String> = row.iter().map(|&v| fmt_num(v)).collect();
        let _ = writeln!(out, "\t{};", cells.join("\t"));
    }
    let _ = writeln!(out, "];");
}

/// Renders a case as MATPOWER function file text.
pub fn write_case(mpc: &MPC) -> String {
    let name = if mpc.name.is_empty() {
        "nemflow_case".to_string()
    } else {
        mpc.name.replace(|c: char| !c.is_alphanumeric() && c != '_', "_")
    };

    let mut out = String::new();
    let _ = writeln!(out, "function mpc = {}", name);
    let _ = writeln!(out, "mpc.version = '2';");
    let _ = writeln!(out, "mpc.baseMVA = {};", fmt_num(mpc.base_mva));

    let _ = writeln!(out, "\n%% bus data");
    write_matrix(&mut out, "bus", &mpc.bus.iter().map(bus_to_row).collect::<Vec<_>>());

    let _ = writeln!(out, "\n%% generator data");
    write_matrix(&mut out, "gen", &mpc.gen.iter().map(gen_to_row).collect::<Vec<_>>());

    let _ = writeln!(out, "\n%% branch data");
    write_matrix(
        &mut out,
        "branch",
        &mpc.branch
            .iter()
            .map(|br| branch_to_row(br, false))
            .collect::<Vec<_>>(),
    );

    if mpc.gen.iter().any(|g| g.cost.is_some()) {
        let _ = writeln!(out, "\n%% generator cost data");
        write_matrix(&mut out, "gencost", &gencost_rows(&mpc.gen));
    }

    if mpc.gen.iter().any(|g| g.kind != GenKind::Conventional) {
        let _ = writeln!(out, "\n%% generator category (0 conventional, 1 solar, 2 wind)");
        write_matrix(
            &mut out,
            "gen_kind",
            &mpc.gen.iter().map(|g| vec![kind_code(g.kind)]).collect::<Vec<_>>(),
        );
    }

    if !mpc.storage.is_empty() {
        let _ = writeln!(out, "\n%% storage data (bus, power MW, energy MWh, set-point MW, status)");
        write_matrix(
            &mut out,
            "storage",
            &mpc.storage
                .iter()
                .map(|s| {
                    vec![
                        s.bus as f64,
                        s.power_mw,
                        s.energy_mwh,
                        s.p_mw,
                        if s.status { 1.0 } else { 0.0 },
                    ]
                })
                .collect::<Vec<_>>(),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use anyhow::Result;

    const CASE: &str = r#"
function mpc = tiny
%% a two bus case
mpc.version = '2';
mpc.baseMVA = 100;
mpc.bus = [
	10	3	0	0	0	0	1	1	0	230	1	1.1	0.9;
	20	1	50	10	0	0	1	1	0	230	1	1.1	0.9; % load bus
];
mpc.gen = [
	10	0	0	300	-300	1	100	1	250	10;
];
mpc.branch = [ 10 20 0.01 0.1 0.02 100 100 100 0 0 1 -360 360 ];
mpc.gencost = [
	2	0	0	3	0.11	5	150;
];
mpc.bus_name = {
	'North';
	'South';
};
"#;

    #[test]
    fn parses_sections() -> Result<()> {
        let mpc = parse_case_str("ignored", CASE)?;
        assert_eq!(mpc.name, "tiny");
        assert_eq!(mpc.base_mva, 100.0);
        assert_eq!(mpc.bus_ids(), vec![10, 20]);
        assert_eq!(mpc.bus[1].pd, 50.0);
        assert_eq!(mpc.gen.len(), 1);
        assert_eq!(mpc.gen[0].pmax, 250.0);
        assert_eq!(mpc.branch.len(), 1);
        assert_eq!(mpc.branch[0].t_bus, 20);
        assert!(matches!(
            mpc.gen[0].cost,
            Some(GenCost::Polynomial { ref coeffs, .. }) if coeffs == &vec![0.11, 5.0, 150.0]
        ));
        Ok(())
    }

    #[test]
    fn short_rows_are_schema_errors() {
        let content = "mpc.bus = [\n 1 3 0 0 0 0 1 1 0;\n];";
        match parse_case_str("short", content) {
            Err(CaseError::Schema {
                table, expected, found, ..
            }) => {
                assert_eq!(table, "bus");
                assert_eq!(expected, BUS_COLS);
                assert_eq!(found, 9);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn missing_bus_matrix() {
        assert!(matches!(
            parse_case_str("empty", "mpc.baseMVA = 100;"),
            Err(CaseError::MissingSection("bus"))
        ));
    }

    #[test]
    fn unterminated_matrix() {
        let content = "mpc.bus = [\n 1 3 0 0 0 0 1 1 0 230 1 1.1 0.9;\n";
        assert!(matches!(
            parse_case_str("open", content),
            Err(CaseError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn written_case_reads_back() -> Result<()> {
        let mut mpc = catalog::case9();
        mpc.gen[1].kind = GenKind::Wind;
        mpc.branch[0].rate_a = f64::INFINITY;
        mpc.storage.push(Storage {
            bus: 7,
            power_mw: 20.0,
            energy_mwh: 80.0,
            p_mw: -5.0,
            status: true,
        });

        let text = write_case(&mpc);
        let back = parse_case_str("other", &text)?;

        assert_eq!(back.name, "case9");
        assert_eq!(back.bus, mpc.bus);
        assert_eq!(back.gen, mpc.gen);
        assert_eq!(back.branch, mpc.branch);
        assert_eq!(back.storage, mpc.storage);
        Ok(())
    }

    #[test]
    fn oversized_ncost_is_a_parse_error() {
        for ncost in ["1e20", "Inf", "-1", "2.5"] {
            let row = format!("2\t0\t0\t{}\t0.11", ncost);
            let content = CASE.replace("2\t0\t0\t3\t0.11", &row);
            assert_ne!(content, CASE);
            assert!(
                matches!(
                    parse_case_str("bad", &content),
                    Err(CaseError::Parse { line: 15, .. })
                ),
                "NCOST {}",
                ncost
            );
        }
        // a large but representable count is a short row
        let content = CASE.replace("2\t0\t0\t3\t0.11", "2\t0\t0\t4000000000\t0.11");
        assert!(matches!(
            parse_case_str("bad", &content),
            Err(CaseError::Schema { table: "gencost", .. })
        ));
    }

    #[test]
    fn bus_numbers_must_be_whole() {
        let fractional = CASE.replace("\t20\t1\t50", "\t20.5\t1\t50");
        assert!(matches!(
            parse_case_str("bad", &fractional),
            Err(CaseError::Parse { line: 8, .. })
        ));

        let negative = CASE.replace("mpc.branch = [ 10 20", "mpc.branch = [ 10 -20");
        assert!(matches!(
            parse_case_str("bad", &negative),
            Err(CaseError::Parse { line: 13, .. })
        ));

        let gen = CASE.replace("\t10\t0\t0\t300", "\t9.9\t0\t0\t300");
        assert!(matches!(
            parse_case_str("bad", &gen),
            Err(CaseError::Parse { line: 11, .. })
        ));
    }
}
