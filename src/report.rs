use crate::error::ReportError;
use crate::indicators::{Category, Indicator, IndicatorSet};
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

const SOCIAL: &[&str] = &["Local employment", "Energy access"];
const ENVIRONMENTAL: &[&str] = &["Avoided CO2 emissions", "Land use"];

/// How a report file is opened.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Append to the file, creating it if needed.
    #[default]
    Append,
    /// Fail if the file already exists.
    CreateNew,
    /// Truncate an existing file.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTarget {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: WriteMode,
}

fn line(out: &mut String, label: &str, value: &str) {
    out.push_str(&format!("  {:<34}{}\n", label, value));
}

fn section(out: &mut String, set: &IndicatorSet, category: Category) -> Result<(), ReportError> {
    for ind in Indicator::ALL.iter().filter(|i| i.category() == category) {
        let value = if ind.is_optional() {
            match set.get(*ind) {
                Some(v) => v,
                None => continue,
            }
        } else {
            set.require(*ind)?
        };
        let text = if *ind == Indicator::VoltageViolations {
            format!("{:.0} {}", value, ind.unit())
        } else {
            format!("{:.3} {}", value, ind.unit())
        };
        line(out, ind.label(), &text);
    }
    Ok(())
}

/// Renders the indicators of one scenario in report order.
///
/// Fails when a required indicator is missing.
pub fn render(title: &str, set: &IndicatorSet) -> Result<String, ReportError> {
    let mut out = format!("=== {} ===\n", title);

    out.push_str("Technical indicators\n");
    section(&mut out, set, Category::Technical)?;

    out.push_str("Economic indicators\n");
    section(&mut out, set, Category::Economic)?;

    out.push_str("Social indicators\n");
    for label in SOCIAL {
        line(&mut out, label, "not evaluated");
    }
    out.push_str("Environmental indicators\n");
    for label in ENVIRONMENTAL {
        line(&mut out, label, "not evaluated");
    }
    Ok(out)
}

/// Prints `text` and, when a target is given, persists it.
pub fn publish(text: &str, target: Option<&ReportTarget>) -> Result<(), ReportError> {
    print!("{}", text);
    if let Some(target) = target {
        write_to(text, target)?;
    }
    Ok(())
}

pub fn write_to(text: &str, target: &ReportTarget) -> Result<(), ReportError> {
    let mut options = OpenOptions::new();
    match target.mode {
        WriteMode::Append => options.create(true).append(true),
        WriteMode::CreateNew => options.write(true).create_new(true),
        WriteMode::Overwrite => options.write(true).create(true).truncate(true),
    };
    let io_err = |source| ReportError::Io {
        path: target.path.clone(),
        source,
    };
    let mut file = options.open(&target.path).map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)?;
    info!("report written to {}", target.path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_set() -> IndicatorSet {
        let mut set = IndicatorSet::default();
        for (i, ind) in Indicator::ALL.iter().enumerate() {
            if !ind.is_optional() {
                set.insert(*ind, i as f64);
            }
        }
        set
    }

    #[test]
    fn fixed_order() -> anyhow::Result<()> {
        let text = render("case9", &full_set())?;
        let technical = text.find("Technical").unwrap_or(usize::MAX);
        let economic = text.find("Economic").unwrap_or(usize::MAX);
        let social = text.find("Social").unwrap_or(usize::MAX);
        let environmental = text.find("Environmental").unwrap_or(usize::MAX);
        assert!(technical < economic && economic < social && social < environmental);
        assert!(text.contains("Minimum voltage"));
        assert!(text.contains("0.000 p.u."));
        assert!(text.contains("not evaluated"));
        assert!(!text.contains("Optimal compensation cost"));
        Ok(())
    }

    #[test]
    fn missing_indicator_fails() {
        let mut set = IndicatorSet::default();
        set.insert(Indicator::VoltageMin, 1.0);
        assert!(matches!(
            render("x", &set),
            Err(ReportError::MissingIndicator(name)) if name == "voltage_max"
        ));
    }

    #[test]
    fn append_never_truncates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = ReportTarget {
            path: dir.path().join("report.txt"),
            mode: WriteMode::Append,
        };
        write_to("first\n", &target)?;
        write_to("second\n", &target)?;
        assert_eq!(std::fs::read_to_string(&target.path)?, "first\nsecond\n");

        let create = ReportTarget {
            mode: WriteMode::CreateNew,
            ..target.clone()
        };
        assert!(matches!(write_to("third\n", &create), Err(ReportError::Io { .. })));

        let overwrite = ReportTarget {
            mode: WriteMode::Overwrite,
            ..target.clone()
        };
        write_to("fourth\n", &overwrite)?;
        assert_eq!(std::fs::read_to_string(&target.path)?, "fourth\n");
        Ok(())
    }
}
