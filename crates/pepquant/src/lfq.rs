//! Label-free quantification from MS1 extracted ion chromatograms

use fnv::FnvHashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::evidence::{Evidence, IonSet, Protein};
use crate::mass::Tolerance;
use crate::spectrum::{RawSpectrum, Spectra, SpectrumIndex};
use crate::Error;

/// Minimum number of MS1 scans with signal required to accept a trace
pub const MIN_TRACE_SCANS: usize = 5;
/// Number of most intense ions summed into a protein intensity
const TOP_N: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LfqSettings {
    /// Mass tolerance, in ppm, around the precursor m/z
    pub ppm_tolerance: f32,
    /// Retention time window, in minutes, searched for MS1 signal
    pub rt_window: f32,
    /// Retention time window, in minutes, from which the apex is picked
    pub peak_window: f32,
}

impl Default for LfqSettings {
    fn default() -> Self {
        Self {
            ppm_tolerance: 10.0,
            rt_window: 3.0,
            peak_window: 0.4,
        }
    }
}

/// Extract the chromatographic trace of `target_mz` from `scans`, returning
/// the apex intensity near `rt` (minutes), or 0.0 if the trace is rejected
pub fn trace_intensity(
    target_mz: f32,
    rt: f32,
    scans: &[RawSpectrum],
    settings: &LfqSettings,
) -> f64 {
    let (lo, hi) = Tolerance::ppm(settings.ppm_tolerance).bounds(target_mz);
    let signal = scans
        .iter()
        .map(|scan| (scan.scan_start_time, scan.max_intensity_between(lo, hi)))
        .filter(|(_, intensity)| *intensity > 0.0)
        .collect::<Vec<_>>();

    if signal.len() < MIN_TRACE_SCANS {
        return 0.0;
    }

    signal
        .iter()
        .filter(|(scan_rt, _)| (scan_rt - rt).abs() <= settings.peak_window)
        .map(|(_, intensity)| *intensity as f64)
        .fold(0.0, f64::max)
}

fn psm_intensity(index: &SpectrumIndex, mz: f32, rt: f32, settings: &LfqSettings) -> f64 {
    let scans = index.ms1_between(rt - settings.rt_window, rt + settings.rt_window);
    trace_intensity(mz, rt, scans, settings)
}

/// Assign an apex intensity to every PSM. Source files are processed in
/// parallel; every PSM is written by exactly one file's task
pub fn quantify(
    evidence: &mut Evidence,
    spectra: &Spectra,
    settings: &LfqSettings,
) -> Result<(), Error> {
    let mut by_run: FnvHashMap<&str, Vec<usize>> = FnvHashMap::default();
    for (idx, psm) in evidence.psms.iter().enumerate() {
        by_run.entry(psm.run.as_str()).or_default().push(idx);
    }

    // Fail before doing any work if a run is missing
    let jobs = by_run
        .into_iter()
        .map(|(run, psms)| Ok((spectra.get(run)?, psms)))
        .collect::<Result<Vec<_>, Error>>()?;

    let psms = &evidence.psms;
    let intensities = jobs
        .par_iter()
        .flat_map_iter(|(index, slots)| {
            log::trace!("- extracting {} traces from {}", slots.len(), index.run);
            slots.iter().map(|&slot| {
                let psm = &psms[slot];
                (
                    slot,
                    psm_intensity(index, psm.mz(), psm.rt_minutes(), settings),
                )
            })
        })
        .collect::<Vec<_>>();

    let found = intensities.iter().filter(|(_, i)| *i > 0.0).count();
    for (slot, intensity) in intensities {
        evidence.psms[slot].intensity = intensity;
    }
    log::info!(
        "- label-free: quantified {}/{} PSMs",
        found,
        evidence.psms.len()
    );
    Ok(())
}

/// Sum of the `TOP_N` largest values
fn top_n(intensities: impl Iterator<Item = f64>) -> f64 {
    intensities
        .sorted_by(|a, b| a.total_cmp(b))
        .rev()
        .take(TOP_N)
        .sum()
}

/// Derive ion, peptide and protein intensities from PSM intensities
///
/// * Ion: maximum PSM intensity
/// * Peptide: sum of PSM intensities
/// * Protein: sum of the 3 most intense ions, for each of the total, unique
///   and razor ion sets
pub fn rollup(evidence: &mut Evidence) -> Result<(), Error> {
    if evidence.psms.is_empty() {
        return Err(Error::CannotFindPsmData("PSM"));
    }
    if evidence.ions.is_empty() {
        return Err(Error::CannotFindPsmData("ion"));
    }

    let ion_index = evidence.ion_index();
    let peptide_index = evidence.peptide_index();
    evidence.ions.iter_mut().for_each(|ion| ion.intensity = 0.0);
    evidence.peptides.iter_mut().for_each(|pep| pep.intensity = 0.0);

    for psm in &evidence.psms {
        if let Some(&slot) = ion_index.get(&psm.ion_form()) {
            let ion = &mut evidence.ions[slot];
            ion.intensity = ion.intensity.max(psm.intensity);
        }
        if let Some(&slot) = peptide_index.get(&psm.peptide) {
            evidence.peptides[slot].intensity += psm.intensity;
        }
    }

    let ions = &evidence.ions;
    let intensity = |protein: &Protein, set: IonSet| {
        top_n(
            protein
                .ion_set(set)
                .filter_map(|ion| ion_index.get(&ion.form))
                .map(|&slot| ions[slot].intensity),
        )
    };
    for protein in &mut evidence.proteins {
        protein.total_intensity = intensity(protein, IonSet::Total);
        protein.unique_intensity = intensity(protein, IonSet::Unique);
        protein.razor_intensity = intensity(protein, IonSet::Razor);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::evidence::{ProteinIon, Psm, Tags};

    fn ms1(id: usize, rt: f32, mz: f32, intensity: f32) -> RawSpectrum {
        RawSpectrum {
            id: format!("scan={}", id),
            ms_level: 1,
            scan_start_time: rt,
            mz: vec![mz - 5.0, mz, mz + 5.0],
            intensity: vec![1.0, intensity, 1.0],
            ..Default::default()
        }
    }

    fn trace(n: usize, mz: f32) -> Vec<RawSpectrum> {
        // Gaussian-ish elution profile centered at 10.0 min
        (0..n)
            .map(|i| {
                let rt = 10.0 + (i as f32 - (n / 2) as f32) * 0.1;
                let intensity = 1000.0 - 100.0 * (rt - 10.0).abs() * 10.0;
                ms1(i, rt, mz, intensity)
            })
            .collect()
    }

    #[test]
    fn minimum_scans() {
        let settings = LfqSettings::default();
        assert_eq!(trace_intensity(500.0, 10.0, &trace(4, 500.0), &settings), 0.0);
        assert_eq!(
            trace_intensity(500.0, 10.0, &trace(5, 500.0), &settings),
            1000.0
        );
    }

    #[test]
    fn mass_tolerance() {
        let settings = LfqSettings::default();
        // 500.01 is 20 ppm away from 500.0
        let scans = trace(7, 500.01);
        assert_eq!(trace_intensity(500.0, 10.0, &scans, &settings), 0.0);
        let wide = LfqSettings {
            ppm_tolerance: 25.0,
            ..settings
        };
        assert_eq!(trace_intensity(500.0, 10.0, &scans, &wide), 1000.0);
    }

    #[test]
    fn apex_is_within_peak_window() {
        let settings = LfqSettings {
            peak_window: 0.05,
            ..Default::default()
        };
        let mut scans = trace(9, 500.0);
        // Most intense scan at 10.4 min is outside the peak window of 10.0
        scans[8].intensity[1] = 5000.0;
        assert_eq!(trace_intensity(500.0, 10.0, &scans, &settings), 1000.0);
    }

    #[test]
    fn top_three() {
        assert_eq!(top_n([1.0, 5.0, 3.0, 4.0].into_iter()), 12.0);
        assert_eq!(top_n([2.0, 1.0].into_iter()), 3.0);
        assert_eq!(top_n(std::iter::empty()), 0.0);
    }

    fn psm(spectrum: &str, peptide: &str, charge: u8, intensity: f64) -> Psm {
        Psm {
            spectrum: spectrum.into(),
            run: "run".into(),
            scannr: spectrum.into(),
            peptide: peptide.into(),
            charge,
            calcmass: 998.0,
            rt: 600.0,
            probability: 0.9,
            protein: "A".into(),
            intensity,
            ..Default::default()
        }
    }

    #[test]
    fn roll_up_levels() {
        let psms = vec![
            psm("s1", "PEPTIDEK", 2, 10.0),
            psm("s2", "PEPTIDEK", 2, 30.0),
            psm("s3", "PEPTIDEK", 3, 5.0),
            psm("s4", "LESLIEK", 2, 7.0),
        ];
        let mut evidence = Evidence::new(Tags::default(), psms);
        let ions = evidence
            .ions
            .iter()
            .map(|ion| ProteinIon {
                form: ion.form.clone(),
                weight: 1.0,
                unique: ion.form.sequence == "PEPTIDEK",
                razor: false,
            })
            .collect();
        evidence.proteins.push(Protein {
            name: "A".into(),
            ions,
            ..Default::default()
        });

        rollup(&mut evidence).unwrap();
        let ions = evidence.ion_index();
        let form = evidence.psms[0].ion_form();
        assert_eq!(evidence.ions[ions[&form]].intensity, 30.0);
        let peptides = evidence.peptide_index();
        assert_eq!(evidence.peptides[peptides["PEPTIDEK"]].intensity, 45.0);

        let protein = &evidence.proteins[0];
        assert_eq!(protein.total_intensity, 30.0 + 7.0 + 5.0);
        assert_eq!(protein.unique_intensity, 35.0);
        assert_eq!(protein.razor_intensity, 35.0);
    }

    #[test]
    fn quantify_missing_run() {
        let mut evidence = Evidence::new(Tags::default(), vec![psm("s1", "PEPTIDEK", 2, 0.0)]);
        let spectra = Spectra::default();
        assert!(matches!(
            quantify(&mut evidence, &spectra, &LfqSettings::default()),
            Err(Error::MissingSpectra(_))
        ));
    }

    #[test]
    fn quantify_psms() {
        let psm = psm("s1", "PEPTIDEK", 2, 0.0);
        let mz = psm.mz();
        let mut evidence = Evidence::new(Tags::default(), vec![psm]);
        let spectra: Spectra = std::iter::once(SpectrumIndex::new("run", trace(7, mz))).collect();
        quantify(&mut evidence, &spectra, &LfqSettings::default()).unwrap();
        assert_eq!(evidence.psms[0].intensity, 1000.0);
    }

    #[test]
    fn empty_rollup() {
        let mut evidence = Evidence::default();
        assert!(matches!(
            rollup(&mut evidence),
            Err(Error::CannotFindPsmData("PSM"))
        ));
    }
}
