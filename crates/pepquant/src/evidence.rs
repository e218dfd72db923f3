//! # Evidence model
//!
//! PSMs, peptide ions, peptides and proteins identified in one experiment.
//! Every level is stored as a flat arena (`Vec`) inside [`Evidence`]; records
//! refer to one another by key (an [`IonForm`], a peptide sequence, or a
//! protein name), never by pointer. Use the `*_index` helpers to map keys to
//! arena slots, and mutate records through `&mut evidence.psms[slot]`.

use std::collections::{BTreeMap, BTreeSet};

use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};

use crate::mass;
use crate::razor::Razor;
use crate::tmt::LabelSet;

/// Identity of a peptide ion: stripped sequence, calculated neutral mass
/// (rounded to 4 decimal places) and charge
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IonForm {
    pub sequence: String,
    pub charge: u8,
    /// Calculated neutral mass * 10^4
    mass: i64,
}

impl IonForm {
    pub fn new<S: Into<String>>(sequence: S, calcmass: f64, charge: u8) -> Self {
        IonForm {
            sequence: sequence.into(),
            charge,
            mass: (calcmass * 1E4).round() as i64,
        }
    }

    pub fn mass(&self) -> f64 {
        self.mass as f64 / 1E4
    }
}

impl std::fmt::Display for IonForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}#{:.4}", self.sequence, self.charge, self.mass())
    }
}

/// Protein name prefixes marking decoy and contaminant entries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    pub decoy: String,
    pub contaminant: String,
}

impl Default for Tags {
    fn default() -> Self {
        Tags {
            decoy: "rev_".into(),
            contaminant: "contam_".into(),
        }
    }
}

impl Tags {
    pub fn is_decoy(&self, protein: &str) -> bool {
        !self.decoy.is_empty() && protein.starts_with(&self.decoy)
    }

    pub fn is_contaminant(&self, protein: &str) -> bool {
        !self.contaminant.is_empty() && protein.starts_with(&self.contaminant)
    }
}

/// A single peptide-spectrum match
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Psm {
    /// Unique spectrum identifier across the experiment
    pub spectrum: String,
    /// Source file (run name)
    pub run: String,
    /// Native scan identifier of the MS2 scan within `run`
    pub scannr: String,
    /// Stripped peptide sequence
    pub peptide: String,
    pub modified_peptide: String,
    pub charge: u8,
    /// Calculated neutral mass
    pub calcmass: f64,
    /// Observed neutral mass
    pub expmass: f64,
    /// Retention time, seconds
    pub rt: f32,
    pub hyperscore: f32,
    pub expectation: f64,
    pub probability: f32,
    /// Chosen parent protein
    pub protein: String,
    /// Every protein this sequence maps to, including `protein`
    pub mapped_proteins: BTreeSet<String>,
    pub decoy: bool,
    pub is_unique: bool,
    pub is_razor: bool,
    /// Label-free apex intensity
    pub intensity: f64,
    /// Precursor isolation purity
    pub purity: f32,
    /// Whether the reporter ions of this PSM contribute to roll-up
    pub labels_used: bool,
    pub labels: Option<LabelSet>,
}

impl Psm {
    pub fn ion_form(&self) -> IonForm {
        IonForm::new(self.peptide.as_str(), self.calcmass, self.charge)
    }

    pub fn rt_minutes(&self) -> f32 {
        self.rt / 60.0
    }

    /// Theoretical precursor m/z
    pub fn mz(&self) -> f32 {
        mass::mass_to_mz(self.calcmass, self.charge)
    }

    fn normalize(&mut self, tags: &Tags) {
        if self.modified_peptide.is_empty() {
            self.modified_peptide = self.peptide.clone();
        }
        if !self.protein.is_empty() {
            self.mapped_proteins.insert(self.protein.clone());
        }
        self.is_unique = self.mapped_proteins.len() == 1;
        self.decoy = tags.is_decoy(&self.protein);
    }
}

/// All PSMs sharing an [`IonForm`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ion {
    pub form: IonForm,
    pub modified_peptide: String,
    /// Supporting spectrum identifiers
    pub spectra: BTreeSet<String>,
    /// Best PSM probability
    pub probability: f32,
    pub protein: String,
    pub mapped_proteins: BTreeSet<String>,
    pub decoy: bool,
    pub is_unique: bool,
    pub is_razor: bool,
    pub intensity: f64,
    pub labels: Option<LabelSet>,
}

/// All ions sharing a stripped sequence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    pub sequence: String,
    pub charges: BTreeSet<u8>,
    pub spectra: BTreeSet<String>,
    pub probability: f32,
    pub protein: String,
    pub mapped_proteins: BTreeSet<String>,
    pub decoy: bool,
    pub is_unique: bool,
    pub is_razor: bool,
    pub intensity: f64,
    pub labels: Option<LabelSet>,
}

impl Peptide {
    pub fn spectral_count(&self) -> usize {
        self.spectra.len()
    }
}

/// A protein's view of one of its peptide ions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProteinIon {
    pub form: IonForm,
    pub weight: f32,
    /// The ion maps to this protein only
    pub unique: bool,
    /// The ion was assigned to this protein by the razor resolver
    pub razor: bool,
}

/// Which of a protein's ions contribute to a summary value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IonSet {
    Total,
    Unique,
    /// Unique ions plus shared ions owned by the protein
    Razor,
}

impl IonSet {
    pub fn contains(&self, ion: &ProteinIon) -> bool {
        match self {
            IonSet::Total => true,
            IonSet::Unique => ion.unique,
            IonSet::Razor => ion.unique || ion.razor,
        }
    }
}

/// An inferred protein (group representative)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Protein {
    pub name: String,
    pub group: u32,
    pub description: String,
    pub probability: f32,
    pub indistinguishable: Vec<String>,
    pub decoy: bool,
    pub contaminant: bool,
    pub ions: Vec<ProteinIon>,

    pub total_spc: usize,
    pub unique_spc: usize,
    pub razor_spc: usize,
    pub total_peptides: BTreeSet<String>,
    pub unique_peptides: BTreeSet<String>,
    pub razor_peptides: BTreeSet<String>,

    pub total_intensity: f64,
    pub unique_intensity: f64,
    pub razor_intensity: f64,

    pub total_labels: Option<LabelSet>,
    pub unique_labels: Option<LabelSet>,
    pub razor_labels: Option<LabelSet>,
}

impl Protein {
    pub fn ion_set(&self, set: IonSet) -> impl Iterator<Item = &ProteinIon> {
        self.ions.iter().filter(move |ion| set.contains(ion))
    }
}

/// A constituent peptide ion reported for an upstream protein group
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateIon {
    pub sequence: String,
    pub charge: u8,
}

/// One row of the upstream (validated, FDR-filtered) protein list
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProteinCandidate {
    pub name: String,
    #[serde(default)]
    pub group: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "one")]
    pub probability: f32,
    /// Proteins that cannot be distinguished from `name` by peptide evidence
    #[serde(default)]
    pub indistinguishable: Vec<String>,
    /// If not empty, only these ions may be attributed to the protein
    #[serde(default)]
    pub peptide_ions: Vec<CandidateIon>,
}

fn one() -> f32 {
    1.0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub tags: Tags,
    pub psms: Vec<Psm>,
    pub ions: Vec<Ion>,
    pub peptides: Vec<Peptide>,
    pub proteins: Vec<Protein>,
}

impl Evidence {
    /// Ingest upstream PSMs, assembling the ion and peptide levels
    pub fn new(tags: Tags, mut psms: Vec<Psm>) -> Self {
        psms.iter_mut().for_each(|psm| psm.normalize(&tags));
        let mut evidence = Evidence {
            tags,
            psms,
            ..Default::default()
        };
        evidence.assemble_ions();
        evidence.assemble_peptides();
        log::info!(
            "- assembled {} ions, {} peptides from {} PSMs",
            evidence.ions.len(),
            evidence.peptides.len(),
            evidence.psms.len()
        );
        evidence
    }

    pub fn ion_index(&self) -> FnvHashMap<IonForm, usize> {
        self.ions
            .iter()
            .enumerate()
            .map(|(idx, ion)| (ion.form.clone(), idx))
            .collect()
    }

    pub fn peptide_index(&self) -> FnvHashMap<String, usize> {
        self.peptides
            .iter()
            .enumerate()
            .map(|(idx, pep)| (pep.sequence.clone(), idx))
            .collect()
    }

    pub fn protein_index(&self) -> FnvHashMap<String, usize> {
        self.proteins
            .iter()
            .enumerate()
            .map(|(idx, prot)| (prot.name.clone(), idx))
            .collect()
    }

    fn assemble_ions(&mut self) {
        let mut ions: BTreeMap<IonForm, Ion> = BTreeMap::new();
        for psm in &self.psms {
            let ion = ions.entry(psm.ion_form()).or_insert_with_key(|form| Ion {
                form: form.clone(),
                modified_peptide: psm.modified_peptide.clone(),
                spectra: BTreeSet::new(),
                probability: f32::MIN,
                protein: psm.protein.clone(),
                mapped_proteins: BTreeSet::new(),
                decoy: psm.decoy,
                is_unique: false,
                is_razor: false,
                intensity: 0.0,
                labels: None,
            });
            ion.spectra.insert(psm.spectrum.clone());
            if psm.probability > ion.probability {
                ion.probability = psm.probability;
                ion.protein = psm.protein.clone();
                ion.decoy = psm.decoy;
            }
            ion.mapped_proteins.extend(psm.mapped_proteins.iter().cloned());
            ion.is_razor |= psm.is_razor;
        }

        self.ions = ions
            .into_values()
            .map(|mut ion| {
                ion.is_unique = ion.mapped_proteins.len() == 1;
                ion
            })
            .collect();
    }

    fn assemble_peptides(&mut self) {
        let mut peptides: BTreeMap<&str, Peptide> = BTreeMap::new();
        for ion in &self.ions {
            let pep = peptides
                .entry(ion.form.sequence.as_str())
                .or_insert_with(|| Peptide {
                    sequence: ion.form.sequence.clone(),
                    charges: BTreeSet::new(),
                    spectra: BTreeSet::new(),
                    probability: f32::MIN,
                    protein: ion.protein.clone(),
                    mapped_proteins: BTreeSet::new(),
                    decoy: ion.decoy,
                    is_unique: false,
                    is_razor: false,
                    intensity: 0.0,
                    labels: None,
                });
            pep.charges.insert(ion.form.charge);
            pep.spectra.extend(ion.spectra.iter().cloned());
            if ion.probability > pep.probability {
                pep.probability = ion.probability;
                pep.protein = ion.protein.clone();
                pep.decoy = ion.decoy;
            }
            pep.mapped_proteins.extend(ion.mapped_proteins.iter().cloned());
            pep.is_razor |= ion.is_razor;
        }

        self.peptides = peptides
            .into_values()
            .map(|mut pep| {
                pep.is_unique = pep.mapped_proteins.len() == 1;
                pep
            })
            .collect();
    }

    /// Rewrite protein names at every level so that indistinguishable proteins
    /// are referred to by their group representative
    fn canonicalize(&mut self, razor: &Razor) {
        fn rewrite(protein: &mut String, mapped: &mut BTreeSet<String>, razor: &Razor) -> bool {
            *protein = razor.canonical(protein).to_string();
            *mapped = mapped
                .iter()
                .map(|name| razor.canonical(name).to_string())
                .collect();
            mapped.len() == 1
        }

        for psm in &mut self.psms {
            psm.is_unique = rewrite(&mut psm.protein, &mut psm.mapped_proteins, razor);
        }
        for ion in &mut self.ions {
            ion.is_unique = rewrite(&mut ion.protein, &mut ion.mapped_proteins, razor);
        }
        for pep in &mut self.peptides {
            pep.is_unique = rewrite(&mut pep.protein, &mut pep.mapped_proteins, razor);
        }
    }

    /// Build the protein level from the upstream protein list, attaching to
    /// each protein the ions that map to it along with the razor assignments
    pub fn assemble_proteins(&mut self, candidates: &[ProteinCandidate], razor: &Razor) {
        self.canonicalize(razor);

        let mut seen = FnvHashSet::default();
        let mut proteins = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !seen.insert(candidate.name.as_str()) {
                log::warn!("duplicate protein `{}` in protein list", candidate.name);
                continue;
            }

            let allowed = candidate
                .peptide_ions
                .iter()
                .map(|ion| (ion.sequence.as_str(), ion.charge))
                .collect::<FnvHashSet<_>>();

            let ions = self
                .ions
                .iter()
                .filter(|ion| ion.mapped_proteins.contains(&candidate.name))
                .filter(|ion| {
                    allowed.is_empty()
                        || allowed.contains(&(ion.form.sequence.as_str(), ion.form.charge))
                })
                .map(|ion| {
                    let assignment = razor.get(&ion.form);
                    ProteinIon {
                        form: ion.form.clone(),
                        weight: assignment
                            .map(|a| a.weight)
                            .unwrap_or(1.0 / ion.mapped_proteins.len() as f32),
                        unique: ion.mapped_proteins.len() == 1,
                        razor: assignment
                            .map(|a| a.protein == candidate.name)
                            .unwrap_or(false),
                    }
                })
                .collect();

            proteins.push(Protein {
                name: candidate.name.clone(),
                group: candidate.group,
                description: candidate.description.clone(),
                probability: candidate.probability,
                indistinguishable: candidate.indistinguishable.clone(),
                decoy: self.tags.is_decoy(&candidate.name),
                contaminant: self.tags.is_contaminant(&candidate.name),
                ions,
                ..Default::default()
            });
        }
        self.proteins = proteins;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub fn psm(spectrum: &str, peptide: &str, charge: u8, proteins: &[&str]) -> Psm {
        Psm {
            spectrum: spectrum.into(),
            run: "run".into(),
            scannr: spectrum.into(),
            peptide: peptide.into(),
            charge,
            calcmass: 100.0 * peptide.len() as f64,
            probability: 0.9,
            protein: proteins[0].into(),
            mapped_proteins: proteins.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn ion_form_rounding() {
        let a = IonForm::new("PEPTIDE", 799.35997, 2);
        let b = IonForm::new("PEPTIDE", 799.359971, 2);
        let c = IonForm::new("PEPTIDE", 799.35997, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "PEPTIDE#2#799.3600");
    }

    #[test]
    fn tags() {
        let tags = Tags::default();
        assert!(tags.is_decoy("rev_sp|P1"));
        assert!(!tags.is_decoy("sp|P1"));
        assert!(tags.is_contaminant("contam_sp|P1"));
        let untagged = Tags {
            decoy: String::new(),
            contaminant: String::new(),
        };
        assert!(!untagged.is_decoy("rev_sp|P1"));
    }

    #[test]
    fn assemble_levels() {
        let mut shared = psm("s3", "PEPTIDE", 2, &["B", "A"]);
        shared.probability = 0.99;
        let psms = vec![
            psm("s1", "PEPTIDE", 2, &["A"]),
            psm("s2", "PEPTIDE", 3, &["A"]),
            shared,
            psm("s4", "LESLIEK", 2, &["rev_C"]),
        ];
        let evidence = Evidence::new(Tags::default(), psms);

        assert_eq!(evidence.ions.len(), 3);
        assert_eq!(evidence.peptides.len(), 2);

        let ions = evidence.ion_index();
        let ion = &evidence.ions[ions[&IonForm::new("PEPTIDE", 700.0, 2)]];
        assert_eq!(ion.spectra.len(), 2);
        assert_eq!(ion.probability, 0.99);
        assert_eq!(ion.protein, "B");
        assert!(!ion.is_unique);

        let peptides = evidence.peptide_index();
        let pep = &evidence.peptides[peptides["PEPTIDE"]];
        assert_eq!(pep.charges.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(pep.spectral_count(), 3);

        let decoy = &evidence.peptides[peptides["LESLIEK"]];
        assert!(decoy.decoy);
        assert!(decoy.is_unique);

        for psm in &evidence.psms {
            assert!(psm.mapped_proteins.contains(&psm.protein));
            assert_eq!(psm.is_unique, psm.mapped_proteins.len() == 1);
        }
    }

    #[test]
    fn candidate_defaults() {
        let candidate: ProteinCandidate =
            serde_json::from_str(r#"{"name": "sp|P1", "group": 3}"#).unwrap();
        assert_eq!(candidate.probability, 1.0);
        assert!(candidate.peptide_ions.is_empty());
        assert!(candidate.indistinguishable.is_empty());
    }
}
