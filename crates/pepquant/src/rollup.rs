//! Make the PSM, ion, peptide and protein levels of an [`Evidence`] agree with
//! the razor assignments held by its (filtered) protein set.

use std::collections::BTreeSet;

use fnv::{FnvHashMap, FnvHashSet};

use crate::evidence::{Evidence, IonForm, IonSet, Tags};

/// Number of records removed during pruning
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub proteins: usize,
    pub psms: usize,
    pub ions: usize,
    pub peptides: usize,
}

/// Reassign a record to its razor owner. A decoy protein never replaces a
/// target assignment.
fn reassign(
    tags: &Tags,
    owner: &str,
    protein: &mut String,
    mapped: &mut BTreeSet<String>,
    decoy: &mut bool,
) -> bool {
    let owner_decoy = tags.is_decoy(owner);
    if owner_decoy && !*decoy {
        return false;
    }
    // The previous owner stays in `mapped` as an alternative protein
    mapped.insert(owner.to_string());
    *protein = owner.to_string();
    *decoy = owner_decoy;
    true
}

struct Lookup {
    razor_ions: FnvHashMap<IonForm, String>,
    razor_peptides: FnvHashMap<String, String>,
}

impl Lookup {
    fn new(evidence: &Evidence) -> Self {
        let mut lookup = Lookup {
            razor_ions: FnvHashMap::default(),
            razor_peptides: FnvHashMap::default(),
        };
        for protein in &evidence.proteins {
            for ion in protein.ions.iter().filter(|ion| ion.razor) {
                lookup
                    .razor_ions
                    .entry(ion.form.clone())
                    .or_insert_with(|| protein.name.clone());
                lookup
                    .razor_peptides
                    .entry(ion.form.sequence.clone())
                    .or_insert_with(|| protein.name.clone());
            }
        }
        lookup
    }
}

/// Hand razor ions held by a decoy protein over to the target protein that
/// the ion record is assigned to. Returns the number of ions moved
fn demote_decoy_owners(evidence: &mut Evidence) -> usize {
    let tags = &evidence.tags;
    let targets = evidence
        .ions
        .iter()
        .filter(|ion| !ion.decoy && !tags.is_decoy(&ion.protein))
        .map(|ion| (ion.form.clone(), ion.protein.clone()))
        .collect::<FnvHashMap<_, _>>();

    let mut moved: FnvHashMap<IonForm, String> = FnvHashMap::default();
    for protein in evidence
        .proteins
        .iter_mut()
        .filter(|prot| tags.is_decoy(&prot.name))
    {
        for ion in protein.ions.iter_mut().filter(|ion| ion.razor) {
            if let Some(target) = targets.get(&ion.form) {
                ion.razor = false;
                moved.insert(ion.form.clone(), target.clone());
            }
        }
    }

    for protein in &mut evidence.proteins {
        for ion in &mut protein.ions {
            if moved.get(&ion.form) == Some(&protein.name) {
                ion.razor = true;
            }
        }
    }
    moved.len()
}

fn propagate(evidence: &mut Evidence, lookup: &Lookup) {
    let tags = evidence.tags.clone();

    // PSMs of one ion report the union of its mapped proteins
    let ion_mapped = evidence
        .ions
        .iter()
        .map(|ion| (ion.form.clone(), ion.mapped_proteins.clone()))
        .collect::<FnvHashMap<_, _>>();

    for psm in &mut evidence.psms {
        let form = psm.ion_form();
        if let Some(mapped) = ion_mapped.get(&form) {
            psm.mapped_proteins.extend(mapped.iter().cloned());
        }
        if let Some(owner) = lookup.razor_ions.get(&form) {
            if reassign(
                &tags,
                owner,
                &mut psm.protein,
                &mut psm.mapped_proteins,
                &mut psm.decoy,
            ) {
                psm.is_razor = true;
            }
        }
        psm.is_unique = psm.mapped_proteins.len() == 1;
    }

    for ion in &mut evidence.ions {
        if let Some(owner) = lookup.razor_ions.get(&ion.form) {
            if reassign(
                &tags,
                owner,
                &mut ion.protein,
                &mut ion.mapped_proteins,
                &mut ion.decoy,
            ) {
                ion.is_razor = true;
            }
        }
        ion.is_unique = ion.mapped_proteins.len() == 1;
    }

    for pep in &mut evidence.peptides {
        if let Some(owner) = lookup.razor_peptides.get(&pep.sequence) {
            if reassign(
                &tags,
                owner,
                &mut pep.protein,
                &mut pep.mapped_proteins,
                &mut pep.decoy,
            ) {
                pep.is_razor = true;
            }
        }
        pep.is_unique = pep.mapped_proteins.len() == 1;
    }
}

/// Recompute spectral counts and peptide sets of every protein from its ions
fn recompute_support(evidence: &mut Evidence) {
    let ion_index = evidence.ion_index();
    let ions = &evidence.ions;

    for protein in &mut evidence.proteins {
        let mut spectra: [BTreeSet<&str>; 3] = Default::default();
        let mut peptides: [BTreeSet<String>; 3] = Default::default();

        for (idx, set) in [IonSet::Total, IonSet::Unique, IonSet::Razor]
            .into_iter()
            .enumerate()
        {
            for pi in protein.ion_set(set) {
                let Some(&slot) = ion_index.get(&pi.form) else {
                    continue;
                };
                spectra[idx].extend(ions[slot].spectra.iter().map(String::as_str));
                peptides[idx].insert(pi.form.sequence.clone());
            }
        }

        let [total, unique, razor] = spectra;
        protein.total_spc = total.len();
        protein.unique_spc = unique.len();
        protein.razor_spc = razor.len();
        let [total, unique, razor] = peptides;
        protein.total_peptides = total;
        protein.unique_peptides = unique;
        protein.razor_peptides = razor;
    }
}

fn prune(evidence: &mut Evidence) -> Summary {
    let mut summary = Summary::default();

    let before = evidence.proteins.len();
    evidence.proteins.retain(|prot| prot.total_spc > 0);
    summary.proteins = before - evidence.proteins.len();

    let surviving = evidence
        .proteins
        .iter()
        .map(|prot| prot.name.clone())
        .collect::<FnvHashSet<_>>();

    let before = evidence.psms.len();
    evidence.psms.retain(|psm| surviving.contains(&psm.protein));
    summary.psms = before - evidence.psms.len();

    let before = evidence.ions.len();
    evidence.ions.retain(|ion| surviving.contains(&ion.protein));
    summary.ions = before - evidence.ions.len();

    let before = evidence.peptides.len();
    evidence.peptides.retain(|pep| surviving.contains(&pep.protein));
    summary.peptides = before - evidence.peptides.len();

    summary
}

/// Propagate razor/unique flags to every level, recompute protein spectral
/// support, and prune records whose protein did not survive filtering
pub fn synchronize(evidence: &mut Evidence) -> Summary {
    let demoted = demote_decoy_owners(evidence);
    if demoted > 0 {
        log::info!("- roll-up: {} razor ions moved from decoy to target proteins", demoted);
    }
    let lookup = Lookup::new(evidence);
    propagate(evidence, &lookup);
    recompute_support(evidence);
    let summary = prune(evidence);
    log::info!(
        "- roll-up: pruned {} proteins, {} PSMs, {} ions, {} peptides",
        summary.proteins,
        summary.psms,
        summary.ions,
        summary.peptides
    );
    summary
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::evidence::{ProteinCandidate, Psm};
    use crate::razor;

    fn psm(spectrum: &str, peptide: &str, charge: u8, proteins: &[&str]) -> Psm {
        Psm {
            spectrum: spectrum.into(),
            peptide: peptide.into(),
            charge,
            calcmass: 100.0 * peptide.len() as f64,
            probability: 0.9,
            protein: proteins[0].into(),
            mapped_proteins: proteins.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn candidate(name: &str) -> ProteinCandidate {
        ProteinCandidate {
            name: name.into(),
            probability: 1.0,
            ..Default::default()
        }
    }

    fn build(psms: Vec<Psm>, candidates: &[ProteinCandidate]) -> Evidence {
        let razor = razor::resolve(&psms, candidates);
        let mut evidence = Evidence::new(Tags::default(), psms);
        evidence.assemble_proteins(candidates, &razor);
        evidence
    }

    #[test]
    fn razor_owner_propagates() {
        let psms = vec![
            psm("s1", "AAAK", 2, &["A"]),
            psm("s2", "CCCK", 2, &["A"]),
            psm("s3", "SHARED", 2, &["B", "A"]),
            psm("s4", "SHARED", 3, &["B", "A"]),
            psm("s5", "EEEK", 2, &["B"]),
        ];
        let mut evidence = build(psms, &[candidate("A"), candidate("B")]);
        let summary = synchronize(&mut evidence);
        assert_eq!(summary, Summary::default());

        for psm in evidence.psms.iter().filter(|p| p.peptide == "SHARED") {
            assert_eq!(psm.protein, "A");
            assert!(psm.is_razor);
            assert!(!psm.is_unique);
            assert!(psm.mapped_proteins.contains("B"));
        }
        let pep = &evidence.peptides[evidence.peptide_index()["SHARED"]];
        assert_eq!(pep.protein, "A");
        assert!(pep.is_razor);

        let proteins = evidence.protein_index();
        let a = &evidence.proteins[proteins["A"]];
        assert_eq!((a.total_spc, a.unique_spc, a.razor_spc), (4, 2, 4));
        assert_eq!(a.razor_peptides.len(), 3);
        let b = &evidence.proteins[proteins["B"]];
        assert_eq!((b.total_spc, b.unique_spc, b.razor_spc), (3, 1, 1));
        assert_eq!(b.total_peptides.len(), 2);
    }

    #[test]
    fn decoy_never_replaces_target() {
        let psms = vec![
            psm("s1", "AAAK", 2, &["rev_A"]),
            psm("s2", "CCCK", 2, &["rev_A"]),
            psm("s3", "SHARED", 2, &["B", "rev_A"]),
        ];
        let mut evidence = build(psms, &[candidate("rev_A"), candidate("B")]);
        synchronize(&mut evidence);

        let shared = evidence
            .psms
            .iter()
            .find(|p| p.peptide == "SHARED")
            .unwrap();
        assert_eq!(shared.protein, "B");
        assert!(!shared.decoy);
        assert!(shared.is_razor);

        let ion = evidence
            .ions
            .iter()
            .find(|i| i.form.sequence == "SHARED")
            .unwrap();
        assert_eq!(ion.protein, "B");
        assert!(ion.is_razor);
        let pep = &evidence.peptides[evidence.peptide_index()["SHARED"]];
        assert_eq!(pep.protein, "B");
        assert!(pep.is_razor);

        // Razor credit follows the target owner
        let proteins = evidence.protein_index();
        let decoy = &evidence.proteins[proteins["rev_A"]];
        assert_eq!(
            (decoy.total_spc, decoy.unique_spc, decoy.razor_spc),
            (3, 2, 2)
        );
        assert!(!decoy.razor_peptides.contains("SHARED"));
        let target = &evidence.proteins[proteins["B"]];
        assert_eq!(
            (target.total_spc, target.unique_spc, target.razor_spc),
            (1, 0, 1)
        );
        assert!(target.razor_peptides.contains("SHARED"));
    }


    #[test]
    fn orphans_are_pruned() {
        let psms = vec![
            psm("s1", "AAAK", 2, &["A"]),
            psm("s2", "GONEK", 2, &["C"]),
        ];
        // `C` was removed by upstream FDR filtering; `D` has no evidence at all
        let mut evidence = build(psms, &[candidate("A"), candidate("D")]);
        let summary = synchronize(&mut evidence);
        assert_eq!(summary.proteins, 1);
        assert_eq!(summary.psms, 1);
        assert_eq!(summary.ions, 1);
        assert_eq!(summary.peptides, 1);

        let names = evidence.protein_index();
        assert!(evidence.psms.iter().all(|p| names.contains_key(&p.protein)));
        assert!(evidence.proteins.iter().all(|p| p.total_spc > 0));
    }

    #[test]
    fn uniqueness_invariant_holds() {
        let psms = vec![
            psm("s1", "AAAK", 2, &["A"]),
            psm("s2", "SHARED", 2, &["B", "A"]),
            psm("s3", "OTHERK", 2, &["C", "B"]),
            psm("s4", "CCCK", 2, &["C"]),
        ];
        let mut evidence = build(psms, &[candidate("A"), candidate("B"), candidate("C")]);
        synchronize(&mut evidence);
        for ion in &evidence.ions {
            assert_eq!(ion.is_unique, ion.mapped_proteins.len() == 1);
        }
        for prot in &evidence.proteins {
            assert!(prot.unique_spc <= prot.razor_spc);
            assert!(prot.razor_spc <= prot.total_spc);
        }
    }

    #[test]
    fn uniqueness_follows_mapped_sets() {
        let psms = vec![
            psm("s1", "AAAK", 2, &["A"]),
            psm("s2", "CCCK", 2, &["A"]),
            // Same ion, but only one PSM lists both proteins
            psm("s3", "SHARED", 2, &["B"]),
            psm("s4", "SHARED", 2, &["B", "A"]),
            // Unique at charge 2, shared at charge 3
            psm("s5", "MIXEDK", 2, &["A"]),
            psm("s6", "MIXEDK", 3, &["A", "B"]),
        ];
        let mut evidence = build(psms, &[candidate("A"), candidate("B")]);
        synchronize(&mut evidence);

        let s3 = evidence.psms.iter().find(|p| p.spectrum == "s3").unwrap();
        assert_eq!(s3.protein, "A");
        assert!(s3.is_razor);
        assert!(!s3.is_unique);
        assert_eq!(s3.mapped_proteins.len(), 2);

        for psm in &evidence.psms {
            assert_eq!(psm.is_unique, psm.mapped_proteins.len() == 1);
        }
        for ion in &evidence.ions {
            assert_eq!(ion.is_unique, ion.mapped_proteins.len() == 1);
        }
        for pep in &evidence.peptides {
            assert_eq!(pep.is_unique, pep.mapped_proteins.len() == 1);
        }
        let mixed = &evidence.peptides[evidence.peptide_index()["MIXEDK"]];
        assert!(!mixed.is_unique);
        assert!(mixed.is_razor);
    }

    #[test]
    fn empty_evidence() {
        let mut evidence = Evidence::default();
        assert_eq!(synchronize(&mut evidence), Summary::default());
    }
}
