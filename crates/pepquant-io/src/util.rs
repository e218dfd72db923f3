use crate::{read_and_execute, DataPath, Error};
use pepquant_core::spectrum::{run_name, RawSpectrum, SpectrumIndex};
use tokio::io::AsyncReadExt;

pub fn read_mzml<S: AsRef<str>>(path: S, file_id: usize) -> Result<Vec<RawSpectrum>, Error> {
    read_and_execute(path, |bf| async move {
        Ok(crate::mzml::MzMLReader::with_file_id(file_id)
            .parse(bf)
            .await?)
    })
}

pub fn read_json<S, T>(path: S) -> Result<T, Error>
where
    S: AsRef<str>,
    T: for<'de> serde::Deserialize<'de>,
{
    read_and_execute(path, |mut bf| async move {
        let mut contents = String::new();
        bf.read_to_string(&mut contents).await?;
        Ok(serde_json::from_str(&contents)?)
    })
}

/// Read the (decompressed) contents of a file
pub fn read_bytes<S: AsRef<str>>(path: S) -> Result<Vec<u8>, Error> {
    read_and_execute(path, |mut bf| async move {
        let mut contents = Vec::new();
        bf.read_to_end(&mut contents).await?;
        Ok(contents)
    })
}

/// Location of the cached spectra of `run` within `cache`
pub fn cache_path(cache: &DataPath, run: &str) -> DataPath {
    cache.join(format!("{}.json.gz", run))
}

/// Read and index the spectra of one mzML file.
///
/// With a `cache` directory, freshly parsed spectra are written to
/// `<cache>/<run>.json.gz`, and a file that cannot be read falls back to its
/// cached copy. The read error is only returned if no cached copy exists
pub fn read_spectra(
    path: &str,
    file_id: usize,
    cache: Option<&DataPath>,
) -> Result<SpectrumIndex, Error> {
    let run = run_name(path);
    match read_mzml(path, file_id) {
        Ok(spectra) => {
            log::trace!("- {}: read {} spectra", path, spectra.len());
            if let Some(cache) = cache {
                let target = cache_path(cache, &run);
                let written = serde_json::to_vec(&spectra)
                    .map_err(Error::from)
                    .and_then(|bytes| target.write_bytes_sync(bytes));
                if let Err(e) = written {
                    log::warn!("could not cache spectra for {}: {}", run, e);
                }
            }
            Ok(SpectrumIndex::new(run, spectra))
        }
        Err(e) => match cache.map(|cache| cache_path(cache, &run)) {
            Some(cached) if cached.exists() => {
                log::warn!("{}: {}; using cached spectra from {}", path, e, cached);
                let spectra: Vec<RawSpectrum> = read_json(cached.to_string())?;
                Ok(SpectrumIndex::new(run, spectra))
            }
            _ => Err(e),
        },
    }
}
