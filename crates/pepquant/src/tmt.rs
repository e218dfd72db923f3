//! Isobaric label (TMT, iTRAQ) quantification

use fnv::FnvHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::evidence::{Evidence, IonSet, Protein};
use crate::mass::Tolerance;
use crate::spectrum::{Precursor, RawSpectrum, Spectra, SpectrumIndex};
use crate::Error;

/// Tolerance, in Da, for matching precursor isotope peaks
const ISOTOPE_TOLERANCE: f32 = 0.02;
/// Number of isotope peaks considered when computing purity
const N_ISOTOPES: usize = 6;
/// Isolation window used when a spectrum doesn't report one
const DEFAULT_ISOLATION: Tolerance = Tolerance::Da(-0.5, 0.5);

static TMT_MZ: [f32; 18] = [
    126.127726, 127.124761, 127.131081, 128.128116, 128.134436, 129.131471, 129.137790, 130.134825,
    130.141145, 131.138180, 131.144499, 132.141535, 132.147855, 133.144890, 133.151210, 134.148245,
    134.154565, 135.151600,
];
static TMT_NAMES: [&str; 18] = [
    "126", "127N", "127C", "128N", "128C", "129N", "129C", "130N", "130C", "131N", "131C", "132N",
    "132C", "133N", "133C", "134N", "134C", "135N",
];
static TMT10_NAMES: [&str; 10] = [
    "126", "127N", "127C", "128N", "128C", "129N", "129C", "130N", "130C", "131",
];
static TMT6_MZ: [f32; 6] = [
    126.127726, 127.124761, 128.134436, 129.131471, 130.141145, 131.138180,
];
static TMT6_NAMES: [&str; 6] = ["126", "127", "128", "129", "130", "131"];
static ITRAQ4_MZ: [f32; 4] = [114.1112, 115.1082, 116.1116, 117.1149];
static ITRAQ4_NAMES: [&str; 4] = ["114", "115", "116", "117"];
static ITRAQ8_MZ: [f32; 8] = [
    113.1078, 114.1112, 115.1082, 116.1116, 117.1149, 118.1120, 119.1153, 121.1220,
];
static ITRAQ8_NAMES: [&str; 8] = ["113", "114", "115", "116", "117", "118", "119", "121"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Tmt,
    Itraq,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isobaric {
    Tmt6,
    Tmt10,
    Tmt11,
    Tmt16,
    Tmt18,
    Itraq4,
    Itraq8,
}

impl Isobaric {
    pub fn from_plex(brand: Brand, plex: u8) -> Result<Self, Error> {
        match (brand, plex) {
            (Brand::Tmt, 6) => Ok(Isobaric::Tmt6),
            (Brand::Tmt, 10) => Ok(Isobaric::Tmt10),
            (Brand::Tmt, 11) => Ok(Isobaric::Tmt11),
            (Brand::Tmt, 16) => Ok(Isobaric::Tmt16),
            (Brand::Tmt, 18) => Ok(Isobaric::Tmt18),
            (Brand::Itraq, 4) => Ok(Isobaric::Itraq4),
            (Brand::Itraq, 8) => Ok(Isobaric::Itraq8),
            (brand, plex) => Err(Error::UnknownMultiplex { brand, plex }),
        }
    }

    pub fn brand(&self) -> Brand {
        match self {
            Isobaric::Itraq4 | Isobaric::Itraq8 => Brand::Itraq,
            _ => Brand::Tmt,
        }
    }

    /// Theoretical m/z of each reporter ion, in channel order
    pub fn reporter_masses(&self) -> &'static [f32] {
        match self {
            Isobaric::Tmt6 => &TMT6_MZ,
            Isobaric::Tmt10 => &TMT_MZ[..10],
            Isobaric::Tmt11 => &TMT_MZ[..11],
            Isobaric::Tmt16 => &TMT_MZ[..16],
            Isobaric::Tmt18 => &TMT_MZ,
            Isobaric::Itraq4 => &ITRAQ4_MZ,
            Isobaric::Itraq8 => &ITRAQ8_MZ,
        }
    }

    pub fn channel_names(&self) -> &'static [&'static str] {
        match self {
            Isobaric::Tmt6 => &TMT6_NAMES,
            Isobaric::Tmt10 => &TMT10_NAMES,
            Isobaric::Tmt11 => &TMT_NAMES[..11],
            Isobaric::Tmt16 => &TMT_NAMES[..16],
            Isobaric::Tmt18 => &TMT_NAMES,
            Isobaric::Itraq4 => &ITRAQ4_NAMES,
            Isobaric::Itraq8 => &ITRAQ8_NAMES,
        }
    }

    pub fn plex(&self) -> usize {
        self.reporter_masses().len()
    }

    /// Column headers used in reports, e.g. `tmt_127N`
    pub fn headers(&self) -> Vec<String> {
        let prefix = match self.brand() {
            Brand::Tmt => "tmt",
            Brand::Itraq => "itraq",
        };
        self.channel_names()
            .iter()
            .map(|name| format!("{}_{}", prefix, name))
            .collect()
    }
}

/// A single named reporter channel
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Channel {
    pub name: &'static str,
    pub mz: f32,
    pub intensity: f64,
}

/// Reporter ion intensities, indexed by channel ordinal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    pub isobaric: Isobaric,
    pub intensities: Vec<f64>,
}

impl LabelSet {
    pub fn new(isobaric: Isobaric) -> Self {
        LabelSet {
            isobaric,
            intensities: vec![0.0; isobaric.plex()],
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.isobaric
            .channel_names()
            .iter()
            .zip(self.isobaric.reporter_masses())
            .zip(&self.intensities)
            .map(|((&name, &mz), &intensity)| Channel {
                name,
                mz,
                intensity,
            })
    }

    /// Intensity of the channel called `name`
    pub fn get(&self, name: &str) -> Option<f64> {
        self.channels().find(|c| c.name == name).map(|c| c.intensity)
    }

    /// Per-channel sum
    pub fn add(&mut self, other: &LabelSet) {
        self.intensities
            .iter_mut()
            .zip(&other.intensities)
            .for_each(|(a, b)| *a += b);
    }

    pub fn total(&self) -> f64 {
        self.intensities.iter().sum()
    }

    pub fn zero(&mut self) {
        self.intensities.iter_mut().for_each(|i| *i = 0.0);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TmtSettings {
    /// Reporter ion tolerance, in ppm
    pub tolerance_ppm: f32,
    /// Minimum precursor purity for a PSM to be used
    pub purity: f32,
    /// Minimum PSM probability for a PSM to be used
    pub min_probability: f32,
    /// Fraction of usable PSMs, ranked by summed reporter intensity, to discard
    pub remove_low: f32,
}

impl Default for TmtSettings {
    fn default() -> Self {
        Self {
            tolerance_ppm: 20.0,
            purity: 0.5,
            min_probability: 0.7,
            remove_low: 0.0,
        }
    }
}

/// Ratio of isotope intensity to total intensity in the isolation window,
/// clamped to [0, 1]
pub fn purity_ratio(isotope_sum: f64, isolation_sum: f64) -> f32 {
    if isolation_sum <= 0.0 || isotope_sum <= 0.0 {
        return 0.0;
    }
    ((isotope_sum / isolation_sum) as f32).min(1.0)
}

/// Fraction of the MS1 signal in the isolation window of `precursor` that is
/// explained by the precursor and its isotopes
pub fn precursor_purity(ms1: &RawSpectrum, precursor: &Precursor, charge: u8) -> f32 {
    let target = precursor.isolation_center();
    let (lo, hi) = precursor
        .isolation_window
        .unwrap_or(DEFAULT_ISOLATION)
        .bounds(target);
    let (i, j) = ms1.mz_range(lo, hi);
    let isolation_sum = ms1.intensity[i..j].iter().map(|&i| i as f64).sum::<f64>();

    let own = match precursor.intensity {
        Some(intensity) => intensity,
        None => ms1.max_intensity_between(
            precursor.mz - ISOTOPE_TOLERANCE,
            precursor.mz + ISOTOPE_TOLERANCE,
        ),
    };

    let step = 1.0 / charge.max(1) as f32;
    let isotope_sum = own as f64
        + ms1.mz[i..j]
            .iter()
            .zip(&ms1.intensity[i..j])
            .filter(|&(&mz, _)| {
                (1..=N_ISOTOPES)
                    .any(|k| (mz - (target + k as f32 * step)).abs() <= ISOTOPE_TOLERANCE)
            })
            .map(|(_, &intensity)| intensity as f64)
            .sum::<f64>();

    purity_ratio(isotope_sum, isolation_sum)
}

/// Most intense reporter ion peak for each channel
pub fn extract_channels(ms2: &RawSpectrum, isobaric: Isobaric, tolerance_ppm: f32) -> LabelSet {
    let intensities = isobaric
        .reporter_masses()
        .iter()
        .map(|&mz| {
            let (lo, hi) = Tolerance::ppm(tolerance_ppm).bounds(mz);
            ms2.max_intensity_between(lo, hi) as f64
        })
        .collect();
    LabelSet {
        isobaric,
        intensities,
    }
}

struct Measurement {
    purity: f32,
    labels: LabelSet,
}

fn measure(
    index: &SpectrumIndex,
    scannr: &str,
    charge: u8,
    isobaric: Isobaric,
    settings: &TmtSettings,
) -> Measurement {
    let Some(ms2) = index.msn(scannr) else {
        log::trace!("- scan {} not found in {}", scannr, index.run);
        return Measurement {
            purity: 0.0,
            labels: LabelSet::new(isobaric),
        };
    };

    let purity = match (index.parent(scannr), ms2.precursors.first()) {
        (Some(ms1), Some(precursor)) => {
            let charge = match charge {
                0 => precursor.charge.unwrap_or(1),
                z => z,
            };
            precursor_purity(ms1, precursor, charge)
        }
        _ => 0.0,
    };

    Measurement {
        purity,
        labels: extract_channels(ms2, isobaric, settings.tolerance_ppm),
    }
}

/// Compute precursor purity and reporter ion intensities for every PSM, and
/// decide which PSMs are usable for roll-up. Unusable PSMs have their
/// channels zeroed.
pub fn quantify(
    evidence: &mut Evidence,
    spectra: &Spectra,
    isobaric: Isobaric,
    settings: &TmtSettings,
) -> Result<(), Error> {
    let mut by_run: FnvHashMap<&str, Vec<usize>> = FnvHashMap::default();
    for (idx, psm) in evidence.psms.iter().enumerate() {
        by_run.entry(psm.run.as_str()).or_default().push(idx);
    }
    let jobs = by_run
        .into_iter()
        .map(|(run, psms)| Ok((spectra.get(run)?, psms)))
        .collect::<Result<Vec<_>, Error>>()?;

    let psms = &evidence.psms;
    let measurements = jobs
        .par_iter()
        .flat_map_iter(|(index, slots)| {
            slots.iter().map(|&slot| {
                let psm = &psms[slot];
                (
                    slot,
                    measure(index, &psm.scannr, psm.charge, isobaric, settings),
                )
            })
        })
        .collect::<Vec<_>>();

    for (slot, m) in measurements {
        let psm = &mut evidence.psms[slot];
        psm.purity = m.purity;
        psm.labels_used = m.purity >= settings.purity && psm.probability >= settings.min_probability;
        psm.labels = Some(m.labels);
    }

    if settings.remove_low > 0.0 {
        let mut used = evidence
            .psms
            .iter()
            .enumerate()
            .filter(|(_, psm)| psm.labels_used)
            .map(|(slot, psm)| (slot, psm.labels.as_ref().map(LabelSet::total).unwrap_or(0.0)))
            .collect::<Vec<_>>();
        used.sort_by(|a, b| a.1.total_cmp(&b.1));
        let n = (used.len() as f32 * settings.remove_low.min(1.0)).floor() as usize;
        for &(slot, _) in &used[..n] {
            evidence.psms[slot].labels_used = false;
        }
    }

    let mut n_used = 0;
    for psm in &mut evidence.psms {
        if psm.labels_used {
            n_used += 1;
        } else if let Some(labels) = psm.labels.as_mut() {
            labels.zero();
        }
    }
    log::info!(
        "- isobaric: {}/{} PSMs usable for {:?} quantification",
        n_used,
        evidence.psms.len(),
        isobaric
    );
    Ok(())
}

/// Sum reporter intensities of usable PSMs into ions and peptides, and of ions
/// into the total, unique and razor channel vectors of each protein
pub fn rollup(evidence: &mut Evidence, isobaric: Isobaric) -> Result<(), Error> {
    if evidence.psms.is_empty() {
        return Err(Error::CannotFindPsmData("PSM"));
    }
    if evidence.ions.is_empty() {
        return Err(Error::CannotFindPsmData("ion"));
    }

    let ion_index = evidence.ion_index();
    let peptide_index = evidence.peptide_index();
    evidence
        .ions
        .iter_mut()
        .for_each(|ion| ion.labels = Some(LabelSet::new(isobaric)));
    evidence
        .peptides
        .iter_mut()
        .for_each(|pep| pep.labels = Some(LabelSet::new(isobaric)));

    for psm in evidence.psms.iter().filter(|psm| psm.labels_used) {
        let Some(labels) = psm.labels.as_ref() else {
            continue;
        };
        if let Some(sum) = ion_index
            .get(&psm.ion_form())
            .and_then(|&slot| evidence.ions[slot].labels.as_mut())
        {
            sum.add(labels);
        }
        if let Some(sum) = peptide_index
            .get(&psm.peptide)
            .and_then(|&slot| evidence.peptides[slot].labels.as_mut())
        {
            sum.add(labels);
        }
    }

    let ions = &evidence.ions;
    let sum = |protein: &Protein, set: IonSet| {
        let mut total = LabelSet::new(isobaric);
        protein
            .ion_set(set)
            .filter_map(|ion| ion_index.get(&ion.form))
            .filter_map(|&slot| ions[slot].labels.as_ref())
            .for_each(|labels| total.add(labels));
        total
    };
    for protein in &mut evidence.proteins {
        protein.total_labels = Some(sum(protein, IonSet::Total));
        protein.unique_labels = Some(sum(protein, IonSet::Unique));
        protein.razor_labels = Some(sum(protein, IonSet::Razor));
    }
    Ok(())
}

/// Scale each channel of the razor label vectors by the ratio of that
/// channel's sum across all proteins to the largest channel sum
pub fn normalize(proteins: &mut [Protein]) {
    let mut sums: Vec<f64> = Vec::new();
    for labels in proteins.iter().filter_map(|p| p.razor_labels.as_ref()) {
        if sums.len() < labels.intensities.len() {
            sums.resize(labels.intensities.len(), 0.0);
        }
        sums.iter_mut()
            .zip(&labels.intensities)
            .for_each(|(s, i)| *s += i);
    }

    let max_sum = sums.iter().copied().fold(0.0, f64::max);
    if max_sum <= 0.0 {
        return;
    }
    let factors = sums.iter().map(|s| s / max_sum).collect::<Vec<_>>();

    for labels in proteins.iter_mut().filter_map(|p| p.razor_labels.as_mut()) {
        labels
            .intensities
            .iter_mut()
            .zip(&factors)
            .for_each(|(i, f)| *i *= f);
    }
}
