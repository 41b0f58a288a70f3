use std::io::{self, Write};

use serde::Serialize;

use crate::catalog::CatalogSummary;
use crate::genelist::GenelistSummary;
use crate::genes::GeneFetchSummary;
use crate::merge::MergeReport;
use crate::pipeline::RunReport;
use crate::tabulate::TabulateSummary;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(summary: &CatalogSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_genes(summary: &GeneFetchSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_tabulate(summary: &TabulateSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_merge(report: &MergeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_genelists(summary: &GenelistSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
