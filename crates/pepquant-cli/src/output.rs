use csv::ByteRecord;
use pepquant_core::evidence::{Evidence, Ion, Peptide, Protein, Psm};
use pepquant_core::tmt::LabelSet;
use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::Runner;

fn join<'a, I: IntoIterator<Item = &'a String>>(items: I) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";")
}

fn flag(value: bool) -> &'static [u8] {
    match value {
        true => b"true",
        false => b"false",
    }
}

impl Runner {
    /// Reporter ion channel headers, if isobaric quantification was requested
    fn label_headers(&self) -> Vec<String> {
        self.parameters
            .quant
            .tmt
            .map(|isobaric| isobaric.headers())
            .unwrap_or_default()
    }

    fn push_labels(&self, record: &mut ByteRecord, labels: Option<&LabelSet>) {
        let Some(isobaric) = self.parameters.quant.tmt else {
            return;
        };
        match labels {
            Some(labels) => {
                for intensity in &labels.intensities {
                    record.push_field(ryu::Buffer::new().format(*intensity).as_bytes());
                }
            }
            None => (0..isobaric.plex()).for_each(|_| record.push_field(b"")),
        }
    }

    fn write_tsv(
        &self,
        file_name: &str,
        headers: &[&str],
        records: Vec<ByteRecord>,
    ) -> anyhow::Result<String> {
        let path = self.make_path(file_name);

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = ByteRecord::from(headers.to_vec());
        headers.extend(self.label_headers());
        wtr.write_byte_record(&headers)?;
        for record in records {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        path.write_bytes_sync(bytes)?;
        log::info!("- wrote {}", path);
        Ok(path.to_string())
    }

    pub fn serialize_psm(&self, psm: &Psm) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(psm.spectrum.as_bytes());
        record.push_field(psm.run.as_bytes());
        record.push_field(psm.scannr.as_bytes());
        record.push_field(psm.peptide.as_bytes());
        record.push_field(psm.modified_peptide.as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.charge).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.calcmass).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.expmass).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.rt).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.hyperscore).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.expectation).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.probability).as_bytes());
        record.push_field(psm.protein.as_bytes());
        record.push_field(join(&psm.mapped_proteins).as_bytes());
        record.push_field(flag(psm.decoy));
        record.push_field(flag(psm.is_unique));
        record.push_field(flag(psm.is_razor));
        record.push_field(ryu::Buffer::new().format(psm.intensity).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.purity).as_bytes());
        record.push_field(flag(psm.labels_used));
        self.push_labels(&mut record, psm.labels.as_ref());
        record
    }

    pub fn write_psms(&self, evidence: &Evidence) -> anyhow::Result<String> {
        let mut psms = evidence.psms.iter().collect::<Vec<_>>();
        psms.par_sort_unstable_by(|a, b| {
            (&a.run, &a.spectrum, &a.peptide).cmp(&(&b.run, &b.spectrum, &b.peptide))
        });
        let records = psms
            .into_par_iter()
            .map(|psm| self.serialize_psm(psm))
            .collect();

        self.write_tsv(
            "psm.tsv",
            &[
                "spectrum",
                "filename",
                "scannr",
                "peptide",
                "modified_peptide",
                "charge",
                "calcmass",
                "expmass",
                "rt",
                "hyperscore",
                "expectation",
                "probability",
                "protein",
                "mapped_proteins",
                "is_decoy",
                "is_unique",
                "is_razor",
                "intensity",
                "purity",
                "labels_used",
            ],
            records,
        )
    }

    pub fn serialize_ion(&self, ion: &Ion) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(ion.form.to_string().as_bytes());
        record.push_field(ion.form.sequence.as_bytes());
        record.push_field(ion.modified_peptide.as_bytes());
        record.push_field(itoa::Buffer::new().format(ion.form.charge).as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.form.mass()).as_bytes());
        record.push_field(itoa::Buffer::new().format(ion.spectra.len()).as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.probability).as_bytes());
        record.push_field(ion.protein.as_bytes());
        record.push_field(join(&ion.mapped_proteins).as_bytes());
        record.push_field(flag(ion.decoy));
        record.push_field(flag(ion.is_unique));
        record.push_field(flag(ion.is_razor));
        record.push_field(ryu::Buffer::new().format(ion.intensity).as_bytes());
        self.push_labels(&mut record, ion.labels.as_ref());
        record
    }

    pub fn write_ions(&self, evidence: &Evidence) -> anyhow::Result<String> {
        let mut ions = evidence.ions.iter().collect::<Vec<_>>();
        ions.par_sort_unstable_by(|a, b| a.form.cmp(&b.form));
        let records = ions
            .into_par_iter()
            .map(|ion| self.serialize_ion(ion))
            .collect();

        self.write_tsv(
            "ion.tsv",
            &[
                "ion",
                "peptide",
                "modified_peptide",
                "charge",
                "calcmass",
                "spectral_count",
                "probability",
                "protein",
                "mapped_proteins",
                "is_decoy",
                "is_unique",
                "is_razor",
                "intensity",
            ],
            records,
        )
    }

    pub fn serialize_peptide(&self, peptide: &Peptide) -> ByteRecord {
        let charges = peptide
            .charges
            .iter()
            .map(|z| z.to_string())
            .collect::<Vec<_>>()
            .join(";");

        let mut record = ByteRecord::new();
        record.push_field(peptide.sequence.as_bytes());
        record.push_field(charges.as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.spectral_count()).as_bytes());
        record.push_field(ryu::Buffer::new().format(peptide.probability).as_bytes());
        record.push_field(peptide.protein.as_bytes());
        record.push_field(join(&peptide.mapped_proteins).as_bytes());
        record.push_field(flag(peptide.decoy));
        record.push_field(flag(peptide.is_unique));
        record.push_field(flag(peptide.is_razor));
        record.push_field(ryu::Buffer::new().format(peptide.intensity).as_bytes());
        self.push_labels(&mut record, peptide.labels.as_ref());
        record
    }

    pub fn write_peptides(&self, evidence: &Evidence) -> anyhow::Result<String> {
        let mut peptides = evidence.peptides.iter().collect::<Vec<_>>();
        peptides.par_sort_unstable_by(|a, b| a.sequence.cmp(&b.sequence));
        let records = peptides
            .into_par_iter()
            .map(|peptide| self.serialize_peptide(peptide))
            .collect();

        self.write_tsv(
            "peptide.tsv",
            &[
                "peptide",
                "charges",
                "spectral_count",
                "probability",
                "protein",
                "mapped_proteins",
                "is_decoy",
                "is_unique",
                "is_razor",
                "intensity",
            ],
            records,
        )
    }

    pub fn serialize_protein(&self, protein: &Protein) -> ByteRecord {
        let count = |set: &BTreeSet<String>| itoa::Buffer::new().format(set.len()).to_string();

        let mut record = ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(protein.group).as_bytes());
        record.push_field(protein.name.as_bytes());
        record.push_field(protein.description.as_bytes());
        record.push_field(join(&protein.indistinguishable).as_bytes());
        record.push_field(ryu::Buffer::new().format(protein.probability).as_bytes());
        record.push_field(flag(protein.decoy));
        record.push_field(flag(protein.contaminant));
        record.push_field(count(&protein.total_peptides).as_bytes());
        record.push_field(count(&protein.unique_peptides).as_bytes());
        record.push_field(count(&protein.razor_peptides).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.total_spc).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.unique_spc).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.razor_spc).as_bytes());
        record.push_field(ryu::Buffer::new().format(protein.total_intensity).as_bytes());
        record.push_field(ryu::Buffer::new().format(protein.unique_intensity).as_bytes());
        record.push_field(ryu::Buffer::new().format(protein.razor_intensity).as_bytes());
        self.push_labels(&mut record, protein.razor_labels.as_ref());
        record
    }

    /// One row per protein group representative, reporting razor channel
    /// intensities for isobaric experiments
    pub fn write_proteins(&self, evidence: &Evidence) -> anyhow::Result<String> {
        let mut proteins = evidence.proteins.iter().collect::<Vec<_>>();
        proteins.par_sort_unstable_by(|a, b| (a.group, &a.name).cmp(&(b.group, &b.name)));
        let records = proteins
            .into_par_iter()
            .map(|protein| self.serialize_protein(protein))
            .collect();

        self.write_tsv(
            "protein.tsv",
            &[
                "group",
                "protein",
                "description",
                "indistinguishable",
                "probability",
                "is_decoy",
                "is_contaminant",
                "total_peptides",
                "unique_peptides",
                "razor_peptides",
                "total_spc",
                "unique_spc",
                "razor_spc",
                "total_intensity",
                "unique_intensity",
                "razor_intensity",
            ],
            records,
        )
    }
}
