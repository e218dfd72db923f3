use async_compression::tokio::bufread::ZlibDecoder;
use pepquant_core::mass::Tolerance;
use pepquant_core::spectrum::{Precursor, RawSpectrum, Representation};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::io::{AsyncBufRead, AsyncReadExt};

/// Which tag are we inside?
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Spectrum,
    Scan,
    BinaryDataArray,
    Binary,
    Precursor,
    SelectedIon,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BinaryKind {
    Intensity,
    Mz,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

/// Encoding of the binary data array currently being read
#[derive(Copy, Clone, Debug)]
struct Encoding {
    zlib: bool,
    dtype: Dtype,
    kind: Option<BinaryKind>,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding {
            zlib: false,
            dtype: Dtype::F64,
            kind: None,
        }
    }
}

// MUST supply only one of the following
const ZLIB_COMPRESSION: &[u8] = b"MS:1000574";
const NO_COMPRESSION: &[u8] = b"MS:1000576";

// MUST supply only one of the following
const INTENSITY_ARRAY: &[u8] = b"MS:1000515";
const MZ_ARRAY: &[u8] = b"MS:1000514";

// MUST supply only one of the following
const FLOAT_64: &[u8] = b"MS:1000523";
const FLOAT_32: &[u8] = b"MS:1000521";

const MS_LEVEL: &[u8] = b"MS:1000511";
const PROFILE: &[u8] = b"MS:1000128";
const CENTROID: &[u8] = b"MS:1000127";
const TOTAL_ION_CURRENT: &[u8] = b"MS:1000285";

const SCAN_START_TIME: &[u8] = b"MS:1000016";
const ION_INJECTION_TIME: &[u8] = b"MS:1000927";

const SELECTED_ION_MZ: &[u8] = b"MS:1000744";
const SELECTED_ION_INT: &[u8] = b"MS:1000042";
const SELECTED_ION_CHARGE: &[u8] = b"MS:1000041";

const ISO_WINDOW_TARGET: &[u8] = b"MS:1000827";
const ISO_WINDOW_LOWER: &[u8] = b"MS:1000828";
const ISO_WINDOW_UPPER: &[u8] = b"MS:1000829";

const UNIT_SECOND: &[u8] = b"UO:0000010";

/// Decode a base64 binary data array into f32 values
async fn decode_binary(
    raw: &[u8],
    encoding: Encoding,
    scratch: &mut Vec<u8>,
) -> Result<Vec<f32>, MzMLError> {
    let decoded = base64::decode(raw)?;
    scratch.clear();
    let bytes = match encoding.zlib {
        false => decoded.as_slice(),
        true => {
            let mut r = ZlibDecoder::new(decoded.as_slice());
            let n = r.read_to_end(scratch).await?;
            &scratch[..n]
        }
    };

    let array = match encoding.dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|chunk| {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(chunk);
                f32::from_le_bytes(buf)
            })
            .collect(),
        Dtype::F64 => bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf) as f32
            })
            .collect(),
    };
    Ok(array)
}

/// Streaming parser producing every MS1 and MSn spectrum of an mzML file
#[derive(Default)]
pub struct MzMLReader {
    file_id: usize,
}

impl MzMLReader {
    pub fn with_file_id(file_id: usize) -> Self {
        Self { file_id }
    }

    /// Parse all spectra, in file order. Retention times are converted to
    /// minutes
    pub async fn parse<B: AsyncBufRead + Unpin>(&self, b: B) -> Result<Vec<RawSpectrum>, MzMLError> {
        let mut reader = Reader::from_reader(b);
        let mut buf = Vec::new();
        let mut scratch = Vec::with_capacity(4096);

        let mut state = None;
        let mut encoding = Encoding::default();

        let mut spectrum = RawSpectrum::default_with_file_id(self.file_id);
        let mut precursor = Precursor::default();
        let mut iso_window_lo: Option<f32> = None;
        let mut iso_window_hi: Option<f32> = None;
        let mut spectra = Vec::new();

        macro_rules! extract {
            ($ev:expr, $key:expr) => {
                $ev.try_get_attribute($key)?
                    .ok_or(MzMLError::Malformed)?
                    .value
            };
        }

        macro_rules! extract_value {
            ($ev:expr) => {{
                let s = $ev
                    .try_get_attribute(b"value")?
                    .ok_or(MzMLError::Malformed)?
                    .value;
                std::str::from_utf8(&s)?.parse()?
            }};
        }

        loop {
            match reader.read_event_into_async(&mut buf).await {
                Ok(Event::Start(ref ev)) => {
                    state = match (ev.name().into_inner(), state) {
                        (b"spectrum", _) => Some(State::Spectrum),
                        (b"scan", Some(State::Spectrum)) => Some(State::Scan),
                        (b"binaryDataArray", Some(State::Spectrum)) => Some(State::BinaryDataArray),
                        (b"binary", Some(State::BinaryDataArray)) => Some(State::Binary),
                        (b"precursor", Some(State::Spectrum)) => Some(State::Precursor),
                        (b"selectedIon", Some(State::Precursor)) => Some(State::SelectedIon),
                        _ => state,
                    };
                    match ev.name().into_inner() {
                        b"spectrum" => {
                            let id = extract!(ev, b"id");
                            spectrum.id = std::str::from_utf8(&id)?.to_string();
                        }
                        b"precursor" => {
                            if let Some(scan) = ev.try_get_attribute(b"spectrumRef")? {
                                let scan = std::str::from_utf8(&scan.value)?;
                                precursor.spectrum_ref = Some(scan.to_string())
                            }
                        }
                        b"binaryDataArray" => encoding = Encoding::default(),
                        _ => {}
                    }
                }
                Ok(Event::Empty(ref ev)) if ev.name().into_inner() == b"cvParam" => {
                    let accession = extract!(ev, b"accession");
                    match (state, accession.as_ref()) {
                        (Some(State::BinaryDataArray), ZLIB_COMPRESSION) => encoding.zlib = true,
                        (Some(State::BinaryDataArray), NO_COMPRESSION) => encoding.zlib = false,
                        (Some(State::BinaryDataArray), FLOAT_64) => encoding.dtype = Dtype::F64,
                        (Some(State::BinaryDataArray), FLOAT_32) => encoding.dtype = Dtype::F32,
                        (Some(State::BinaryDataArray), INTENSITY_ARRAY) => {
                            encoding.kind = Some(BinaryKind::Intensity)
                        }
                        (Some(State::BinaryDataArray), MZ_ARRAY) => {
                            encoding.kind = Some(BinaryKind::Mz)
                        }

                        (Some(State::Spectrum), MS_LEVEL) => spectrum.ms_level = extract_value!(ev),
                        (Some(State::Spectrum), PROFILE) => {
                            spectrum.representation = Representation::Profile
                        }
                        (Some(State::Spectrum), CENTROID) => {
                            spectrum.representation = Representation::Centroid
                        }
                        (Some(State::Spectrum), TOTAL_ION_CURRENT) => {
                            spectrum.total_ion_current = extract_value!(ev)
                        }

                        (Some(State::Scan), SCAN_START_TIME) => {
                            let value: f32 = extract_value!(ev);
                            spectrum.scan_start_time = match seconds(ev)? {
                                true => value / 60.0,
                                false => value,
                            };
                        }
                        (Some(State::Scan), ION_INJECTION_TIME) => {
                            spectrum.ion_injection_time = extract_value!(ev)
                        }

                        (Some(State::Precursor), ISO_WINDOW_TARGET) => {
                            precursor.target_mz = Some(extract_value!(ev))
                        }
                        (Some(State::Precursor), ISO_WINDOW_LOWER) => {
                            iso_window_lo = Some(extract_value!(ev))
                        }
                        (Some(State::Precursor), ISO_WINDOW_UPPER) => {
                            iso_window_hi = Some(extract_value!(ev))
                        }

                        (Some(State::SelectedIon), SELECTED_ION_MZ) => {
                            precursor.mz = extract_value!(ev)
                        }
                        (Some(State::SelectedIon), SELECTED_ION_INT) => {
                            precursor.intensity = Some(extract_value!(ev))
                        }
                        (Some(State::SelectedIon), SELECTED_ION_CHARGE) => {
                            precursor.charge = Some(extract_value!(ev))
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(text)) if state == Some(State::Binary) => {
                    let raw = text.unescape()?;
                    // There are occasionally empty binary data arrays, or unknown CVs
                    if let (false, Some(kind)) = (raw.is_empty(), encoding.kind) {
                        let array = decode_binary(raw.as_bytes(), encoding, &mut scratch).await?;
                        match kind {
                            BinaryKind::Intensity => spectrum.intensity = array,
                            BinaryKind::Mz => spectrum.mz = array,
                        }
                    }
                }
                Ok(Event::End(ev)) => {
                    state = match (state, ev.name().into_inner()) {
                        (Some(State::Binary), b"binary") => Some(State::BinaryDataArray),
                        (Some(State::BinaryDataArray), b"binaryDataArray") => Some(State::Spectrum),
                        (Some(State::SelectedIon), b"selectedIon") => Some(State::Precursor),
                        (Some(State::Precursor), b"precursor") => {
                            if precursor.mz != 0.0 || precursor.target_mz.is_some() {
                                if precursor.mz == 0.0 {
                                    precursor.mz = precursor.isolation_center();
                                }
                                precursor.isolation_window = match (iso_window_lo, iso_window_hi) {
                                    (Some(lo), Some(hi)) => Some(Tolerance::Da(-lo, hi)),
                                    _ => None,
                                };
                                spectrum.precursors.push(precursor);
                            }
                            precursor = Precursor::default();
                            iso_window_lo = None;
                            iso_window_hi = None;
                            Some(State::Spectrum)
                        }
                        (Some(State::Scan), b"scan") => Some(State::Spectrum),
                        (_, b"spectrum") => {
                            if spectrum.mz.len() != spectrum.intensity.len() {
                                log::warn!(
                                    "spectrum {}: m/z and intensity arrays differ in length",
                                    spectrum.id
                                );
                                let n = spectrum.mz.len().min(spectrum.intensity.len());
                                spectrum.mz.truncate(n);
                                spectrum.intensity.truncate(n);
                            }
                            spectra.push(spectrum);
                            spectrum = RawSpectrum::default_with_file_id(self.file_id);
                            None
                        }
                        _ => state,
                    };
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    log::error!("unhandled XML error while parsing mzML: {}", err)
                }
            }
            buf.clear();
        }
        Ok(spectra)
    }
}

/// Is the value of this cvParam reported in seconds?
fn seconds(ev: &BytesStart) -> Result<bool, MzMLError> {
    Ok(ev
        .try_get_attribute(b"unitAccession")?
        .map(|unit| unit.value.as_ref() == UNIT_SECOND)
        .unwrap_or(false))
}

#[derive(thiserror::Error, Debug)]
pub enum MzMLError {
    #[error("malformed MzML")]
    Malformed,
    #[error("XML parsing error: {0}")]
    XMLError(#[from] quick_xml::Error),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("utf8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("error parsing float: {0}")]
    FloatError(#[from] std::num::ParseFloatError),
    #[error("error parsing int: {0}")]
    IntError(#[from] std::num::ParseIntError),
    #[error("error decoding base64: {0}")]
    Base64Error(#[from] base64::DecodeError),
}
