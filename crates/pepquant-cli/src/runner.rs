use crate::ingest;
use crate::input::Parameters;
use anyhow::{ensure, Context};
use fnv::FnvHashSet;
use log::info;
use pepquant_core::evidence::{Evidence, ProteinCandidate};
use pepquant_core::spectrum::{run_name, Spectra};
use pepquant_core::{lfq, razor, rollup, tmt};
use pepquant_io::snapshot::Snapshot;
use pepquant_io::util::{read_json, read_spectra};
use pepquant_io::DataPath;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pipeline stages, in execution order. Every stage but `Report` persists
/// the evidence it produced, so a later run can resume from it
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Inference,
    Quant,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Inference, Stage::Quant, Stage::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Inference => "inference",
            Stage::Quant => "quant",
            Stage::Report => "report",
        }
    }

    /// The stage whose snapshot this stage starts from
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Ingest => None,
            Stage::Inference => Some(Stage::Ingest),
            Stage::Quant => Some(Stage::Inference),
            Stage::Report => Some(Stage::Quant),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .with_context(|| format!("unknown stage `{}`", s))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report files written to the output directory
pub const REPORTS: [&str; 4] = ["psm.tsv", "ion.tsv", "peptide.tsv", "protein.tsv"];

pub struct Runner {
    pub parameters: Parameters,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Parameters) -> Self {
        Runner {
            parameters,
            start: Instant::now(),
        }
    }

    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> DataPath {
        let mut path = self.parameters.output_directory.clone();
        path.push(file_name);
        path
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.make_path("evidence"))
    }

    /// Protein candidates are stored next to the evidence snapshot, so that
    /// inference can be resumed without the protein group file
    fn candidates_path(&self) -> DataPath {
        self.make_path("evidence").join("candidates.json.gz")
    }

    fn ingest(&self) -> anyhow::Result<Evidence> {
        let path = &self.parameters.psms;
        let psms =
            ingest::read_psms(path).with_context(|| format!("Failed to read PSMs from `{path}`"))?;

        let candidates = match &self.parameters.proteins {
            Some(path) => ingest::read_candidates(path)
                .with_context(|| format!("Failed to read protein groups from `{path}`"))?,
            None => ingest::candidates_from_psms(&psms),
        };
        info!("- {} protein candidates", candidates.len());

        self.make_path("evidence").mkdir()?;
        self.candidates_path()
            .write_bytes_sync(serde_json::to_vec(&candidates)?)?;

        Ok(Evidence::new(self.parameters.tags.clone(), psms))
    }

    fn inference(&self, evidence: &mut Evidence) -> anyhow::Result<()> {
        let candidates: Vec<ProteinCandidate> = read_json(self.candidates_path().to_string())
            .context("Failed to read protein candidates stored during ingest")?;

        let razor = razor::resolve(&evidence.psms, &candidates);
        evidence.assemble_proteins(&candidates, &razor);
        let summary = rollup::synchronize(evidence);
        info!(
            "- {} razor assignments, {} proteins, pruned {} PSMs",
            razor.len(),
            evidence.proteins.len(),
            summary.psms
        );
        Ok(())
    }

    /// Load the spectra of every run referenced by a PSM, one file per task
    fn load_spectra(&self, evidence: &Evidence) -> anyhow::Result<Spectra> {
        let referenced = evidence
            .psms
            .iter()
            .map(|psm| psm.run.as_str())
            .collect::<FnvHashSet<_>>();

        let cache = self.make_path("spectra");
        cache.mkdir()?;

        let start = Instant::now();
        let spectra = self
            .parameters
            .mzml_paths
            .par_iter()
            .enumerate()
            .filter(|(_, path)| {
                let used = referenced.contains(run_name(path.as_str()).as_str());
                if !used {
                    log::warn!("skipping {}: no PSM references this file", path);
                }
                used
            })
            .map(|(file_id, path)| {
                read_spectra(path, file_id, Some(&cache))
                    .with_context(|| format!("Failed to read spectra from `{path}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!(
            "- loaded {} spectra from {} files in {}ms",
            spectra.iter().map(|index| index.len()).sum::<usize>(),
            spectra.len(),
            start.elapsed().as_millis()
        );
        Ok(spectra.into_iter().collect())
    }

    fn quant(&self, evidence: &mut Evidence) -> anyhow::Result<()> {
        let quant = &self.parameters.quant;
        if !quant.enabled() {
            info!("- no quantification requested");
            return Ok(());
        }

        let spectra = self.load_spectra(evidence)?;
        if let Some(isobaric) = quant.tmt {
            log::trace!("performing isobaric quantification");
            tmt::quantify(evidence, &spectra, isobaric, &quant.tmt_settings)?;
            tmt::rollup(evidence, isobaric)?;
            tmt::normalize(&mut evidence.proteins);
        }
        if quant.lfq {
            log::trace!("performing LFQ");
            lfq::quantify(evidence, &spectra, &quant.lfq_settings)?;
            lfq::rollup(evidence)?;
        }
        Ok(())
    }

    fn report(&mut self, evidence: &Evidence) -> anyhow::Result<()> {
        let outputs = vec![
            self.write_psms(evidence)?,
            self.write_ions(evidence)?,
            self.write_peptides(evidence)?,
            self.write_proteins(evidence)?,
        ];
        self.parameters.output_paths.extend(outputs);
        Ok(())
    }

    /// Would writing `path` clobber the PSM table this run reads from?
    fn overwrites_input(&self, path: &DataPath) -> bool {
        let input = std::path::Path::new(&self.parameters.psms);
        match (input.canonicalize(), path.as_path().canonicalize()) {
            (Ok(input), Ok(output)) => input == output,
            _ => input == path.as_path(),
        }
    }

    /// Read back the snapshot a resumed run starts from
    fn restore(&self, snapshot: &Snapshot, previous: Stage) -> anyhow::Result<Evidence> {
        let (meta, evidence) = snapshot
            .restore()
            .context("Failed to restore evidence snapshot")?;
        let completed = meta.stage.parse::<Stage>()?;
        ensure!(
            completed >= previous,
            "cannot resume: stage `{}` has not completed (last completed stage: `{}`)",
            previous,
            completed
        );
        if completed > previous {
            log::warn!(
                "resuming from a snapshot taken after stage `{}`, not `{}`",
                completed,
                previous
            );
        }
        Ok(evidence)
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        for report in REPORTS {
            let path = self.make_path(report);
            ensure!(
                !self.overwrites_input(&path),
                "refusing to overwrite input PSM table `{}` with a report; \
                 choose another output directory or rename the input",
                path
            );
        }

        let snapshot = self.snapshot();
        let first = self.parameters.resume.unwrap_or(Stage::Ingest);
        let mut evidence = match first.previous() {
            Some(previous) => self.restore(&snapshot, previous)?,
            None => Evidence::default(),
        };

        for stage in Stage::ALL.into_iter().filter(|&stage| stage >= first) {
            let start = Instant::now();
            info!("stage `{}`", stage);
            match stage {
                Stage::Ingest => evidence = self.ingest()?,
                Stage::Inference => self.inference(&mut evidence)?,
                Stage::Quant => self.quant(&mut evidence)?,
                Stage::Report => self.report(&evidence)?,
            }
            if stage != Stage::Report {
                snapshot.persist(stage.as_str(), &evidence)?;
            }
            log::trace!("stage `{}` took {}ms", stage, start.elapsed().as_millis());
        }

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        path.write_bytes_sync(bytes)?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(())
    }
}
