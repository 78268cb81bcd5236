use crate::record::ServerType;
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::{
    fs::{File, create_dir_all},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{error, info};

/// Which records a target file accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    All,
    Origin,
    NonOrigin,
}

impl Route {
    pub fn accepts(self, server_type: ServerType) -> bool {
        match self {
            Route::All => true,
            Route::Origin => server_type == ServerType::Origin,
            Route::NonOrigin => server_type != ServerType::Origin,
        }
    }
}

/// Files written by a report next to `latest.log`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    /// `<date>.log`
    pub dated: bool,
    /// `<date>-cache.log` and `<date>-origin.log`
    pub split_by_server_type: bool,
}

impl Layout {
    pub fn targets(&self, date: NaiveDate) -> Vec<(String, Route)> {
        let mut targets = vec![("latest.log".to_string(), Route::All)];
        if self.dated {
            targets.push((format!("{date}.log"), Route::All));
        }
        if self.split_by_server_type {
            targets.push((format!("{date}-cache.log"), Route::NonOrigin));
            targets.push((format!("{date}-origin.log"), Route::Origin));
        }
        targets
    }
}

struct Target {
    path: PathBuf,
    route: Route,
    writer: BufWriter<File>,
    failed: bool,
}

/// The open report files of one run.
///
/// Every target is truncated once on [`OutputSet::open`]. A target that
/// fails to write is logged and skipped for the rest of the run.
pub struct OutputSet {
    targets: Vec<Target>,
    lines: usize,
}

impl OutputSet {
    pub fn open(dir: &Path, date: NaiveDate, layout: Layout) -> Result<Self> {
        create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let mut targets = Vec::new();
        for (name, route) in layout.targets(date) {
            let path = dir.join(name);
            match File::create(&path) {
                Ok(file) => targets.push(Target {
                    path,
                    route,
                    writer: BufWriter::new(file),
                    failed: false,
                }),
                Err(err) => error!(path = %path.display(), error = %err, "failed to open output file"),
            }
        }

        if targets.is_empty() {
            bail!("No output file could be opened in {}", dir.display());
        }

        info!(
            files = ?targets.iter().map(|t| t.path.display().to_string()).collect::<Vec<_>>(),
            "opened output files"
        );
        Ok(Self { targets, lines: 0 })
    }

    /// Write `line` to every target whose route accepts `server_type`.
    pub fn write_record(&mut self, line: &str, server_type: ServerType) {
        for target in &mut self.targets {
            if target.route.accepts(server_type) {
                write_target(target, line);
            }
        }
        self.lines += 1;
    }

    /// Write `line` to every target regardless of route.
    pub fn write_line(&mut self, line: &str) {
        for target in &mut self.targets {
            write_target(target, line);
        }
        self.lines += 1;
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.targets.iter().map(|t| t.path.as_path()).collect()
    }

    /// Flush every target and return the number of lines written.
    pub fn finish(mut self) -> usize {
        for target in &mut self.targets {
            if let Err(err) = target.writer.flush() {
                error!(path = %target.path.display(), error = %err, "failed to flush output file");
            }
        }
        self.lines
    }
}

fn write_target(target: &mut Target, line: &str) {
    if target.failed {
        return;
    }
    if let Err(err) = writeln!(target.writer, "{line}") {
        error!(path = %target.path.display(), error = %err, "failed to write output file, skipping it");
        target.failed = true;
    }
}
