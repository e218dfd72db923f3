pub mod evidence;
pub mod lfq;
pub mod mass;
pub mod razor;
pub mod rollup;
pub mod spectrum;
pub mod tmt;

use tmt::Brand;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown isobaric multiplex: {brand:?} {plex}-plex")]
    UnknownMultiplex { brand: Brand, plex: u8 },
    #[error("cannot find {0} data; identifications must be processed before quantification")]
    CannotFindPsmData(&'static str),
    #[error("no spectra available for run `{0}`")]
    MissingSpectra(String),
}
