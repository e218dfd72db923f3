//! Reading upstream identifications: the tab-separated PSM table and the
//! protein group list

use anyhow::Context;
use fnv::FnvHashMap;
use pepquant_core::evidence::{ProteinCandidate, Psm};
use pepquant_core::spectrum::run_name;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Scan number within a native spectrum id
const SCAN_PATTERN: &str = r"(?:scan|index|spectrum)=(\d+)|^(\d+)$";

#[derive(Deserialize)]
struct Row {
    filename: String,
    scannr: String,
    peptide: String,
    charge: u8,
    calcmass: f64,
    expmass: f64,
    rt: f32,
    probability: f32,
    protein: String,
    #[serde(default)]
    spectrum: Option<String>,
    #[serde(default)]
    modified_peptide: Option<String>,
    #[serde(default)]
    hyperscore: Option<f32>,
    #[serde(default)]
    expectation: Option<f64>,
    #[serde(default)]
    mapped_proteins: Option<String>,
}

/// Spectrum name of the form `<run>.<scan>.<scan>.<charge>`
pub fn spectrum_name(scan: &Regex, run: &str, scannr: &str, charge: u8) -> String {
    let number = scan
        .captures(scannr)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    match number {
        Some(n) => format!("{}.{:05}.{:05}.{}", run, n, n, charge),
        None => format!("{}.{}.{}.{}", run, scannr, scannr, charge),
    }
}

impl Row {
    fn into_psm(self, scan: &Regex) -> Psm {
        let run = run_name(&self.filename);
        let spectrum = match self.spectrum {
            Some(spectrum) => spectrum,
            None => spectrum_name(scan, &run, &self.scannr, self.charge),
        };
        let mapped_proteins = self
            .mapped_proteins
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        Psm {
            spectrum,
            run,
            scannr: self.scannr,
            peptide: self.peptide,
            modified_peptide: self.modified_peptide.unwrap_or_default(),
            charge: self.charge,
            calcmass: self.calcmass,
            expmass: self.expmass,
            rt: self.rt,
            hyperscore: self.hyperscore.unwrap_or_default(),
            expectation: self.expectation.unwrap_or_default(),
            probability: self.probability,
            protein: self.protein,
            mapped_proteins,
            ..Default::default()
        }
    }
}

/// Parse a tab-separated PSM table with a header row
pub fn parse_psms<R: std::io::Read>(rdr: R) -> anyhow::Result<Vec<Psm>> {
    let scan = Regex::new(SCAN_PATTERN)?;
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(rdr);

    let psms = reader
        .deserialize::<Row>()
        .map(|row| Ok(row?.into_psm(&scan)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if psms.is_empty() {
        log::warn!("PSM table contains no rows");
    }
    Ok(psms)
}

pub fn read_psms(path: &str) -> anyhow::Result<Vec<Psm>> {
    let bytes = pepquant_io::util::read_bytes(path)?;
    let psms = parse_psms(bytes.as_slice())?;
    log::info!("- read {} PSMs from {}", psms.len(), path);
    Ok(psms)
}

/// Read a JSON array of protein groups
pub fn read_candidates(path: &str) -> anyhow::Result<Vec<ProteinCandidate>> {
    let candidates: Vec<ProteinCandidate> = pepquant_io::util::read_json(path)?;
    let mut names = BTreeSet::new();
    for candidate in &candidates {
        anyhow::ensure!(!candidate.name.is_empty(), "protein group without a name");
        if !names.insert(candidate.name.as_str()) {
            log::warn!("protein `{}` is listed more than once", candidate.name);
        }
    }
    Ok(candidates)
}

/// Without an upstream protein list, every protein matched by a PSM is a
/// candidate. Groups are numbered in name order, and a protein's
/// probability is that of its best PSM
pub fn candidates_from_psms(psms: &[Psm]) -> Vec<ProteinCandidate> {
    let mut best: FnvHashMap<&str, f32> = FnvHashMap::default();
    for psm in psms {
        let proteins = std::iter::once(psm.protein.as_str())
            .chain(psm.mapped_proteins.iter().map(String::as_str))
            .filter(|p| !p.is_empty());
        for protein in proteins {
            let probability = best.entry(protein).or_insert(psm.probability);
            *probability = probability.max(psm.probability);
        }
    }

    let names = best.keys().copied().collect::<BTreeSet<_>>();
    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| ProteinCandidate {
            name: name.into(),
            group: idx as u32 + 1,
            probability: best[name],
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const TABLE: &str = "\
filename\tscannr\tpeptide\tmodified_peptide\tcharge\tcalcmass\texpmass\trt\tprobability\tprotein\tmapped_proteins\thyperscore
/data/sample.mzML\tcontrollerType=0 controllerNumber=1 scan=42\tPEPTIDEK\tPEPT[80]IDEK\t2\t927.4549\t927.4560\t600.5\t0.99\tsp|P1\tsp|P2;sp|P3\t31.2
sample.mzML.gz\t43\tSHAREDK\t\t3\t800.4\t800.41\t610\t0.8\tsp|P2\t\t
";

    #[test]
    fn parse_table() {
        let psms = parse_psms(TABLE.as_bytes()).unwrap();
        assert_eq!(psms.len(), 2);

        let first = &psms[0];
        assert_eq!(first.run, "sample");
        assert_eq!(first.spectrum, "sample.00042.00042.2");
        assert_eq!(first.scannr, "controllerType=0 controllerNumber=1 scan=42");
        assert_eq!(first.modified_peptide, "PEPT[80]IDEK");
        assert_eq!(first.rt, 600.5);
        assert_eq!(first.hyperscore, 31.2);
        let mapped = first.mapped_proteins.iter().cloned().collect::<Vec<_>>();
        assert_eq!(mapped, vec!["sp|P2", "sp|P3"]);

        let second = &psms[1];
        assert_eq!(second.run, "sample");
        assert_eq!(second.spectrum, "sample.00043.00043.3");
        assert!(second.modified_peptide.is_empty());
        assert!(second.mapped_proteins.is_empty());
        assert_eq!(second.hyperscore, 0.0);
    }

    #[test]
    fn missing_required_column() {
        let table = "filename\tscannr\tpeptide\nsample.mzML\t1\tPEPTIDEK\n";
        assert!(parse_psms(table.as_bytes()).is_err());
    }

    #[test]
    fn spectrum_names() {
        let scan = Regex::new(SCAN_PATTERN).unwrap();
        assert_eq!(spectrum_name(&scan, "run", "scan=7", 2), "run.00007.00007.2");
        assert_eq!(spectrum_name(&scan, "run", "index=123456", 1), "run.123456.123456.1");
        assert_eq!(spectrum_name(&scan, "run", "F1:7", 2), "run.F1:7.F1:7.2");
    }

    #[test]
    fn implicit_candidates() {
        let mut psms = parse_psms(TABLE.as_bytes()).unwrap();
        psms[1].probability = 0.995;
        let candidates = candidates_from_psms(&psms);
        let names = candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["sp|P1", "sp|P2", "sp|P3"]);
        assert_eq!(candidates[0].group, 1);
        assert_eq!(candidates[2].group, 3);
        assert_eq!(candidates[1].probability, 0.995);
        assert_eq!(candidates[2].probability, 0.99);
    }
}
