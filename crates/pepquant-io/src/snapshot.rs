//! Persist and restore the [`Evidence`] of an experiment between pipeline
//! stages. Each evidence level is stored as its own gzipped JSON document,
//! and a small `meta` document naming the completed stage is written last.
//! The previous `meta` is removed before any level is touched, so a snapshot
//! interrupted mid-write cannot be restored.

use pepquant_core::evidence::{Evidence, Ion, Peptide, Protein, Psm, Tags};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::{read_and_execute, DataPath, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub stage: String,
    pub version: String,
    pub tags: Tags,
    pub psms: usize,
    pub ions: usize,
    pub peptides: usize,
    pub proteins: usize,
}

pub struct Snapshot {
    root: DataPath,
}

impl Snapshot {
    pub fn new(root: DataPath) -> Self {
        Snapshot { root }
    }

    fn path(&self, level: &str) -> DataPath {
        self.root.join(format!("{}.json.gz", level))
    }

    fn write<T: Serialize>(&self, level: &'static str, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.path(level).write_bytes_sync(bytes)?;
        log::trace!("- persisted {} snapshot", level);
        Ok(())
    }

    fn read<T>(&self, level: &'static str) -> Result<T, Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = self.path(level);
        let contents = read_and_execute(path.to_string(), |mut bf| async move {
            let mut contents = String::new();
            bf.read_to_string(&mut contents).await?;
            Ok(contents)
        })?;
        serde_json::from_str(&contents).map_err(|source| Error::Snapshot { level, source })
    }

    /// Write every evidence level in parallel, then record `stage` as complete
    pub fn persist(&self, stage: &str, evidence: &Evidence) -> Result<(), Error> {
        self.root.mkdir()?;
        self.path("meta").remove()?;

        let ((psms, ions), (peptides, proteins)) = rayon::join(
            || {
                rayon::join(
                    || self.write("psm", &evidence.psms),
                    || self.write("ion", &evidence.ions),
                )
            },
            || {
                rayon::join(
                    || self.write("peptide", &evidence.peptides),
                    || self.write("protein", &evidence.proteins),
                )
            },
        );
        psms?;
        ions?;
        peptides?;
        proteins?;

        let meta = Meta {
            stage: stage.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            tags: evidence.tags.clone(),
            psms: evidence.psms.len(),
            ions: evidence.ions.len(),
            peptides: evidence.peptides.len(),
            proteins: evidence.proteins.len(),
        };
        self.write("meta", &meta)?;
        log::info!("- stage `{}` persisted to {}", stage, self.root);
        Ok(())
    }

    /// Most recently completed stage, if any
    pub fn meta(&self) -> Result<Meta, Error> {
        if !self.path("meta").exists() {
            return Err(Error::MissingSnapshot(self.root.to_string()));
        }
        self.read("meta")
    }

    /// Read back every evidence level, returning the stage that produced them
    pub fn restore(&self) -> Result<(Meta, Evidence), Error> {
        let meta = self.meta()?;

        let ((psms, ions), (peptides, proteins)) = rayon::join(
            || {
                rayon::join(
                    || self.read::<Vec<Psm>>("psm"),
                    || self.read::<Vec<Ion>>("ion"),
                )
            },
            || {
                rayon::join(
                    || self.read::<Vec<Peptide>>("peptide"),
                    || self.read::<Vec<Protein>>("protein"),
                )
            },
        );
        let evidence = Evidence {
            tags: meta.tags.clone(),
            psms: psms?,
            ions: ions?,
            peptides: peptides?,
            proteins: proteins?,
        };
        log::info!(
            "- restored {} PSMs, {} proteins from stage `{}`",
            evidence.psms.len(),
            evidence.proteins.len(),
            meta.stage
        );
        Ok((meta, evidence))
    }
}
