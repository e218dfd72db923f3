use std::cmp::Ordering;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::mass::Tolerance;
use crate::Error;

/// A centroided peak
#[derive(PartialEq, PartialOrd, Copy, Clone, Default, Debug, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f32,
    pub intensity: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Representation {
    #[default]
    Profile,
    Centroid,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precursor {
    /// Selected ion m/z
    pub mz: f32,
    /// Isolation window target m/z, if reported
    pub target_mz: Option<f32>,
    pub intensity: Option<f32>,
    pub charge: Option<u8>,
    pub spectrum_ref: Option<String>,
    /// Isolation window offsets, stored as `Da(-lower, upper)`
    pub isolation_window: Option<Tolerance>,
}

impl Precursor {
    /// Center of the isolation window: the target m/z when reported, otherwise
    /// the selected ion m/z
    pub fn isolation_center(&self) -> f32 {
        self.target_mz.unwrap_or(self.mz)
    }
}

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSpectrum {
    pub file_id: usize,
    pub ms_level: u8,
    /// Native scan identifier
    pub id: String,
    /// Retention time, minutes
    pub scan_start_time: f32,
    pub ion_injection_time: f32,
    pub representation: Representation,
    /// Selected ions for precursors, if `ms_level > 1`
    pub precursors: Vec<Precursor>,
    /// M/z array, sorted in ascending order once indexed
    pub mz: Vec<f32>,
    pub intensity: Vec<f32>,
    pub total_ion_current: f32,
}

impl RawSpectrum {
    pub fn default_with_file_id(file_id: usize) -> Self {
        RawSpectrum {
            file_id,
            ..Default::default()
        }
    }

    /// Sort the m/z & intensity arrays by m/z, if they are not already
    fn sort_peaks(&mut self) {
        if self.mz.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut peaks = self
            .mz
            .iter()
            .zip(self.intensity.iter())
            .map(|(&mz, &intensity)| Peak { mz, intensity })
            .collect::<Vec<_>>();
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        self.mz = peaks.iter().map(|p| p.mz).collect();
        self.intensity = peaks.iter().map(|p| p.intensity).collect();
    }

    pub fn peaks(&self) -> impl Iterator<Item = Peak> + '_ {
        self.mz
            .iter()
            .zip(self.intensity.iter())
            .map(|(&mz, &intensity)| Peak { mz, intensity })
    }

    /// Index range of the m/z array covering `[lo, hi]`
    pub fn mz_range(&self, lo: f32, hi: f32) -> (usize, usize) {
        let (i, j) = binary_search_slice(&self.mz, |mz, key| mz.total_cmp(key), lo, hi);
        // `binary_search_slice` returns a superset; tighten to the exact bounds
        let i = i + self.mz[i..j].iter().take_while(|&&mz| mz < lo).count();
        let j = i + self.mz[i..j].iter().take_while(|&&mz| mz <= hi).count();
        (i, j)
    }

    /// Maximum intensity of any peak within `[lo, hi]`, or 0.0 if there is none
    pub fn max_intensity_between(&self, lo: f32, hi: f32) -> f32 {
        let (i, j) = self.mz_range(lo, hi);
        self.intensity[i..j].iter().copied().fold(0.0, f32::max)
    }
}

/// Linear search for most intense peak
pub fn select_most_intense_peak(peaks: &[Peak], mz: f32, tolerance: Tolerance) -> Option<&Peak> {
    let (lo, hi) = tolerance.bounds(mz);
    let mut best_peak = None;
    let mut max_int = 0.0;
    for peak in peaks.iter().filter(|peak| peak.mz >= lo && peak.mz <= hi) {
        if peak.intensity >= max_int {
            max_int = peak.intensity;
            best_peak = Some(peak);
        }
    }
    best_peak
}

/// Return the widest `(left, right)` indices such that all values in
/// `slice[left..right]` fall within `[low, high]`. The returned range may
/// include a neighbouring element on either side
pub fn binary_search_slice<T, F, S>(slice: &[T], key: F, low: S, high: S) -> (usize, usize)
where
    F: Fn(&T, &S) -> Ordering,
{
    if slice.is_empty() {
        return (0, 0);
    }
    let left_idx = match slice.binary_search_by(|a| key(a, &low)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx.saturating_sub(1);
            while idx > 0 && key(&slice[idx], &low) != Ordering::Less {
                idx -= 1;
            }
            idx
        }
    };

    let right_idx = match slice[left_idx..].binary_search_by(|a| key(a, &high)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx + left_idx;
            while idx < slice.len() && key(&slice[idx], &high) != Ordering::Greater {
                idx = idx.saturating_add(1);
            }
            idx.min(slice.len())
        }
    };
    (left_idx, right_idx)
}

/// Normalize a file path or PSM `filename` column into a run name: directory
/// components, `.gz` and `.mzML` extensions are removed
pub fn run_name(path: &str) -> String {
    let name = path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path);
    let mut name = name;
    for ext in [".gz", ".mzml"] {
        if name.len() > ext.len() && name.to_ascii_lowercase().ends_with(ext) {
            name = &name[..name.len() - ext.len()];
        }
    }
    name.to_string()
}

/// Scan number of a native spectrum id: the value of a `scan=` key, or the
/// id itself if it is numeric
pub fn scan_number(id: &str) -> Option<&str> {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if digits(id) {
        return Some(id);
    }
    id.split_whitespace()
        .filter_map(|kv| kv.strip_prefix("scan="))
        .find(|n| digits(n))
}

/// All scans acquired in a single LC-MS run, indexed for quantification
#[derive(Debug, Default)]
pub struct SpectrumIndex {
    pub run: String,
    /// MS1 scans, sorted by retention time
    ms1: Vec<RawSpectrum>,
    msn: Vec<RawSpectrum>,
    msn_ids: FnvHashMap<String, usize>,
    /// Scan number -> index into `msn`
    msn_scans: FnvHashMap<String, usize>,
    /// Index into `ms1` of the parent scan of each MSn scan
    parents: Vec<Option<usize>>,
}

impl SpectrumIndex {
    /// Build an index over the spectra of one file. `spectra` must be in
    /// acquisition order, so that MSn scans without a `spectrumRef` can be
    /// assigned to the last preceding MS1 scan
    pub fn new<S: Into<String>>(run: S, spectra: Vec<RawSpectrum>) -> Self {
        let mut ms1 = Vec::new();
        let mut msn = Vec::new();
        let mut parent_ids = Vec::new();
        let mut last_ms1: Option<String> = None;

        for mut spectrum in spectra {
            spectrum.sort_peaks();
            if spectrum.ms_level == 1 {
                last_ms1 = Some(spectrum.id.clone());
                ms1.push(spectrum);
            } else {
                let parent = spectrum
                    .precursors
                    .first()
                    .and_then(|p| p.spectrum_ref.clone())
                    .or_else(|| last_ms1.clone());
                parent_ids.push(parent);
                msn.push(spectrum);
            }
        }

        ms1.sort_by(|a, b| a.scan_start_time.total_cmp(&b.scan_start_time));
        let ms1_ids = ms1
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id.clone(), idx))
            .collect::<FnvHashMap<_, _>>();
        let parents = parent_ids
            .into_iter()
            .map(|id| id.and_then(|id| ms1_ids.get(&id).copied()))
            .collect();
        let msn_ids = msn
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id.clone(), idx))
            .collect();
        let msn_scans = msn
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| scan_number(&s.id).map(|n| (n.to_string(), idx)))
            .collect();

        SpectrumIndex {
            run: run.into(),
            ms1,
            msn,
            msn_ids,
            msn_scans,
            parents,
        }
    }

    pub fn ms1(&self) -> &[RawSpectrum] {
        &self.ms1
    }

    /// MS1 scans with retention times (minutes) in `[lo, hi]`
    pub fn ms1_between(&self, lo: f32, hi: f32) -> &[RawSpectrum] {
        let (i, j) = binary_search_slice(
            &self.ms1,
            |s, rt| s.scan_start_time.total_cmp(rt),
            lo,
            hi,
        );
        let window = &self.ms1[i..j];
        let skip = window
            .iter()
            .take_while(|s| s.scan_start_time < lo)
            .count();
        let window = &window[skip..];
        let keep = window
            .iter()
            .take_while(|s| s.scan_start_time <= hi)
            .count();
        &window[..keep]
    }

    fn msn_idx(&self, id: &str) -> Option<usize> {
        self.msn_ids
            .get(id)
            .or_else(|| scan_number(id).and_then(|n| self.msn_scans.get(n)))
            .copied()
    }

    /// MSn scan with native id `id`. A bare scan number is also accepted
    pub fn msn(&self, id: &str) -> Option<&RawSpectrum> {
        self.msn_idx(id).map(|idx| &self.msn[idx])
    }

    /// Parent MS1 scan of the MSn scan `id`
    pub fn parent(&self, id: &str) -> Option<&RawSpectrum> {
        let idx = self.msn_idx(id)?;
        self.parents[idx].map(|p| &self.ms1[p])
    }

    pub fn len(&self) -> usize {
        self.ms1.len() + self.msn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spectrum indices for every source file of an experiment, keyed by run name
#[derive(Debug, Default)]
pub struct Spectra {
    runs: FnvHashMap<String, SpectrumIndex>,
}

impl Spectra {
    pub fn insert(&mut self, index: SpectrumIndex) {
        self.runs.insert(index.run.clone(), index);
    }

    pub fn get(&self, run: &str) -> Result<&SpectrumIndex, Error> {
        self.runs
            .get(run)
            .ok_or_else(|| Error::MissingSpectra(run.to_string()))
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl FromIterator<SpectrumIndex> for Spectra {
    fn from_iter<I: IntoIterator<Item = SpectrumIndex>>(iter: I) -> Self {
        let mut spectra = Spectra::default();
        for index in iter {
            spectra.insert(index);
        }
        spectra
    }
}
