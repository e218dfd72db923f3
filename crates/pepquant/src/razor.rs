//! Razor peptide assignment
//!
//! Every peptide ion that maps to more than one protein is handed to a single
//! owner: the candidate protein with the most distinct peptide ions (TNP)
//! explaining it. Ties go to the lexicographically smallest protein name, so
//! the outcome never depends on input order.

use std::collections::{BTreeMap, BTreeSet};

use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};

use crate::evidence::{IonForm, ProteinCandidate, Psm};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RazorAssignment {
    pub protein: String,
    /// 1.0 for ions unique to one protein, otherwise 1/|mapped proteins|
    pub weight: f32,
    /// Best PSM probability for this ion under the owning protein
    pub probability: f32,
    /// The ion maps to a single protein
    pub absolute: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Razor {
    assignments: FnvHashMap<IonForm, RazorAssignment>,
    /// Number of distinct ions explained by each protein
    tnp: FnvHashMap<String, usize>,
    /// Indistinguishable protein -> group representative
    aliases: FnvHashMap<String, String>,
}

impl Razor {
    pub fn get(&self, form: &IonForm) -> Option<&RazorAssignment> {
        self.assignments.get(form)
    }

    pub fn tnp(&self, protein: &str) -> usize {
        self.tnp.get(protein).copied().unwrap_or_default()
    }

    /// Name of the group representative for `protein`, or `protein` itself
    pub fn canonical<'a>(&'a self, protein: &'a str) -> &'a str {
        self.aliases
            .get(protein)
            .map(String::as_str)
            .unwrap_or(protein)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&IonForm, &RazorAssignment)> {
        self.assignments.iter()
    }
}

fn aliases(candidates: &[ProteinCandidate]) -> FnvHashMap<String, String> {
    let mut aliases = FnvHashMap::default();
    for candidate in candidates {
        for sibling in &candidate.indistinguishable {
            if sibling != &candidate.name {
                aliases
                    .entry(sibling.clone())
                    .or_insert_with(|| candidate.name.clone());
            }
        }
    }
    aliases
}

/// Pick the protein with the highest TNP, breaking ties in favor of the
/// lexicographically smallest name
fn choose<'a, I>(proteins: I, tnp: &FnvHashMap<String, usize>) -> Option<&'a str>
where
    I: Iterator<Item = &'a str>,
{
    proteins.max_by(|a, b| {
        let ta = tnp.get(*a).copied().unwrap_or_default();
        let tb = tnp.get(*b).copied().unwrap_or_default();
        ta.cmp(&tb).then_with(|| b.cmp(a))
    })
}

/// Assign every peptide ion in `psms` to exactly one protein
///
/// * `candidates` - the upstream protein list. When any of the proteins an ion
///   maps to are in this list, the owner is chosen among them; otherwise all
///   mapped proteins are eligible.
pub fn resolve(psms: &[Psm], candidates: &[ProteinCandidate]) -> Razor {
    let aliases = aliases(candidates);
    let canonical = |name: &str| -> String {
        aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    };
    let listed = candidates
        .iter()
        .map(|c| c.name.as_str())
        .collect::<FnvHashSet<_>>();

    // Ion form -> (mapped proteins, PSMs)
    let mut ions: BTreeMap<IonForm, (BTreeSet<String>, Vec<&Psm>)> = BTreeMap::new();
    for psm in psms {
        let (mapped, members) = ions.entry(psm.ion_form()).or_default();
        mapped.extend(
            psm.mapped_proteins
                .iter()
                .chain(std::iter::once(&psm.protein))
                .filter(|name| !name.is_empty())
                .map(|name| canonical(name)),
        );
        members.push(psm);
    }

    let mut tnp: FnvHashMap<String, usize> = FnvHashMap::default();
    for (mapped, _) in ions.values() {
        for protein in mapped {
            *tnp.entry(protein.clone()).or_default() += 1;
        }
    }

    let mut assignments = FnvHashMap::default();
    let mut shared = 0;
    for (form, (mapped, members)) in ions {
        let eligible = mapped
            .iter()
            .map(String::as_str)
            .filter(|name| listed.contains(name))
            .collect::<Vec<_>>();

        let owner = if eligible.is_empty() {
            choose(mapped.iter().map(String::as_str), &tnp)
        } else {
            choose(eligible.into_iter(), &tnp)
        };
        let owner = match owner {
            Some(owner) => owner.to_string(),
            None => {
                log::warn!("peptide ion {} has no protein mapping", form);
                continue;
            }
        };

        let supporting = members
            .iter()
            .filter(|psm| {
                canonical(&psm.protein) == owner
                    || psm.mapped_proteins.iter().any(|p| canonical(p) == owner)
            })
            .map(|psm| psm.probability)
            .fold(f32::MIN, f32::max);
        let probability = if supporting > f32::MIN {
            supporting
        } else {
            members.iter().map(|psm| psm.probability).fold(0.0, f32::max)
        };

        let absolute = mapped.len() == 1;
        if !absolute {
            shared += 1;
        }
        assignments.insert(
            form,
            RazorAssignment {
                protein: owner,
                weight: 1.0 / mapped.len() as f32,
                probability,
                absolute,
            },
        );
    }

    log::info!(
        "- razor: {} peptide ions assigned, {} shared",
        assignments.len(),
        shared
    );

    Razor {
        assignments,
        tnp,
        aliases,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn psm(peptide: &str, charge: u8, proteins: &[&str]) -> Psm {
        Psm {
            spectrum: format!("{}.{}", peptide, charge),
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

    #[test]
    fn highest_tnp_wins() {
        let psms = vec![
            psm("AAAK", 2, &["A"]),
            psm("CCCK", 2, &["A"]),
            psm("DDDK", 2, &["A"]),
            psm("EEEK", 2, &["B"]),
            psm("SHARED", 2, &["B", "A"]),
        ];
        let razor = resolve(&psms, &[candidate("A"), candidate("B")]);
        assert_eq!(razor.tnp("A"), 4);
        assert_eq!(razor.tnp("B"), 2);

        let shared = razor.get(&psms[4].ion_form()).unwrap();
        assert_eq!(shared.protein, "A");
        assert_eq!(shared.weight, 0.5);
        assert!(!shared.absolute);

        let unique = razor.get(&psms[3].ion_form()).unwrap();
        assert_eq!(unique.protein, "B");
        assert_eq!(unique.weight, 1.0);
        assert!(unique.absolute);
    }

    #[test]
    fn ties_prefer_smallest_name() {
        let psms = vec![
            psm("AAAK", 2, &["Z"]),
            psm("CCCK", 2, &["M"]),
            psm("SHARED", 2, &["Z", "M"]),
        ];
        let razor = resolve(&psms, &[candidate("Z"), candidate("M")]);
        assert_eq!(razor.get(&psms[2].ion_form()).unwrap().protein, "M");
    }

    #[test]
    fn unlisted_proteins_are_not_eligible() {
        let psms = vec![
            psm("AAAK", 2, &["A"]),
            psm("CCCK", 2, &["A"]),
            psm("SHARED", 2, &["A", "B"]),
        ];
        let razor = resolve(&psms, &[candidate("B")]);
        assert_eq!(razor.get(&psms[2].ion_form()).unwrap().protein, "B");

        // Nothing listed: every mapped protein is eligible
        let razor = resolve(&psms, &[]);
        assert_eq!(razor.get(&psms[2].ion_form()).unwrap().protein, "A");
    }

    #[test]
    fn indistinguishable_proteins_collapse() {
        let psms = vec![psm("AAAK", 2, &["A2"]), psm("SHARED", 2, &["A2", "B"])];
        let mut a = candidate("A");
        a.indistinguishable = vec!["A2".into()];
        let razor = resolve(&psms, &[a, candidate("B")]);
        assert_eq!(razor.canonical("A2"), "A");
        assert_eq!(razor.canonical("B"), "B");
        assert_eq!(razor.tnp("A"), 2);
        assert_eq!(razor.get(&psms[1].ion_form()).unwrap().protein, "A");
        assert!(razor.get(&psms[0].ion_form()).unwrap().absolute);
    }

    #[test]
    fn probability_under_owner() {
        let mut low = psm("SHARED", 2, &["A", "B"]);
        low.probability = 0.5;
        let mut high = psm("SHARED", 2, &["B"]);
        high.probability = 0.99;
        let psms = vec![psm("AAAK", 2, &["A"]), psm("CCCK", 2, &["A"]), low, high];
        let razor = resolve(&psms, &[candidate("A"), candidate("B")]);
        let assignment = razor.get(&psms[2].ion_form()).unwrap();
        assert_eq!(assignment.protein, "A");
        assert_eq!(assignment.probability, 0.5);
    }

    #[quickcheck]
    fn assignment_ignores_input_order(mapping: Vec<(u8, u8, u8)>) -> bool {
        let names = ["P1", "P2", "P3", "P4"];
        let psms = mapping
            .iter()
            .map(|&(seq, a, b)| {
                let peptide = format!("PEP{}K", seq % 8);
                psm(
                    &peptide,
                    2,
                    &[names[a as usize % 4], names[b as usize % 4]],
                )
            })
            .collect::<Vec<_>>();
        let candidates = names.iter().map(|n| candidate(n)).collect::<Vec<_>>();

        let forward = resolve(&psms, &candidates);
        let mut reversed = psms.clone();
        reversed.reverse();
        let mut rcandidates = candidates.clone();
        rcandidates.reverse();
        let backward = resolve(&reversed, &rcandidates);

        psms.iter().all(|psm| {
            let form = psm.ion_form();
            forward.get(&form).map(|a| &a.protein) == backward.get(&form).map(|a| &a.protein)
        })
    }
}
