use anyhow::{ensure, Context};
use clap::ArgMatches;
use pepquant_core::{
    evidence::Tags,
    lfq::LfqSettings,
    tmt::{Brand, Isobaric, TmtSettings},
};
use pepquant_io::DataPath;
use serde::{Deserialize, Serialize};

use crate::runner::Stage;

#[derive(Serialize)]
/// Actual parameters - may include overrides or default values not set by user
pub struct Parameters {
    pub version: String,
    pub psms: String,
    pub proteins: Option<String>,
    pub mzml_paths: Vec<String>,
    pub tags: Tags,
    pub quant: QuantSettings,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: DataPath,

    #[serde(skip_serializing)]
    pub resume: Option<Stage>,
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    psms: Option<String>,
    proteins: Option<String>,
    mzml_paths: Option<Vec<String>>,
    decoy_tag: Option<String>,
    contaminant_tag: Option<String>,
    quant: Option<QuantOptions>,
    output_directory: Option<String>,

    #[serde(skip)]
    resume: Option<Stage>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct LfqOptions {
    ppm_tolerance: Option<f32>,
    rt_window: Option<f32>,
    peak_window: Option<f32>,
}

impl From<LfqOptions> for LfqSettings {
    fn from(value: LfqOptions) -> LfqSettings {
        let default = LfqSettings::default();
        let settings = LfqSettings {
            ppm_tolerance: value.ppm_tolerance.unwrap_or(default.ppm_tolerance).abs(),
            rt_window: value.rt_window.unwrap_or(default.rt_window).abs(),
            peak_window: value.peak_window.unwrap_or(default.peak_window).abs(),
        };
        if settings.ppm_tolerance > 20.0 {
            log::warn!("lfq_settings.ppm_tolerance is higher than expected");
        }
        if settings.rt_window > 10.0 {
            log::warn!("lfq_settings.rt_window is higher than expected");
        }
        if settings.peak_window > settings.rt_window {
            log::warn!("lfq_settings.peak_window is wider than lfq_settings.rt_window");
        }
        settings
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TmtOptions {
    tolerance_ppm: Option<f32>,
    purity: Option<f32>,
    min_probability: Option<f32>,
    remove_low: Option<f32>,
}

impl From<TmtOptions> for TmtSettings {
    fn from(value: TmtOptions) -> Self {
        let default = Self::default();
        let settings = Self {
            tolerance_ppm: value.tolerance_ppm.unwrap_or(default.tolerance_ppm).abs(),
            purity: value.purity.unwrap_or(default.purity),
            min_probability: value.min_probability.unwrap_or(default.min_probability),
            remove_low: value.remove_low.unwrap_or(default.remove_low),
        };
        if settings.tolerance_ppm > 50.0 {
            log::warn!("tmt_settings.tolerance_ppm is higher than expected");
        }
        if !(0.0..=1.0).contains(&settings.purity) {
            log::warn!("tmt_settings.purity should be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&settings.min_probability) {
            log::warn!("tmt_settings.min_probability should be between 0 and 1");
        }
        if !(0.0..1.0).contains(&settings.remove_low) {
            log::warn!("tmt_settings.remove_low should be at least 0 and less than 1");
        }
        Self {
            purity: settings.purity.clamp(0.0, 1.0),
            min_probability: settings.min_probability.clamp(0.0, 1.0),
            remove_low: settings.remove_low.clamp(0.0, 1.0),
            ..settings
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
/// Isobaric label reagent, e.g. `{"brand": "tmt", "plex": 10}`
pub struct LabelOptions {
    #[serde(default = "default_brand")]
    brand: Brand,
    plex: u8,
}

fn default_brand() -> Brand {
    Brand::Tmt
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct QuantOptions {
    pub tmt: Option<LabelOptions>,
    #[serde(rename = "tmt_settings")]
    pub tmt_options: Option<TmtOptions>,

    pub lfq: Option<bool>,
    #[serde(rename = "lfq_settings")]
    pub lfq_options: Option<LfqOptions>,
}

#[derive(Serialize, Default)]
pub struct QuantSettings {
    pub tmt: Option<Isobaric>,
    pub tmt_settings: TmtSettings,
    pub lfq: bool,
    pub lfq_settings: LfqSettings,
}

impl QuantSettings {
    /// Is any kind of quantification requested?
    pub fn enabled(&self) -> bool {
        self.lfq || self.tmt.is_some()
    }
}

impl TryFrom<QuantOptions> for QuantSettings {
    type Error = pepquant_core::Error;

    fn try_from(value: QuantOptions) -> Result<Self, Self::Error> {
        let tmt = value
            .tmt
            .map(|label| Isobaric::from_plex(label.brand, label.plex))
            .transpose()?;
        Ok(Self {
            tmt,
            tmt_settings: value.tmt_options.map(Into::into).unwrap_or_default(),

            lfq: value.lfq.unwrap_or(false),
            lfq_settings: value.lfq_options.map(Into::into).unwrap_or_default(),
        })
    }
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("`parameters` must be set. For more information try '--help'")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(psms) = matches.get_one::<String>("psms") {
            log::trace!("overriding `psms` parameter.");
            input.psms = Some(psms.into());
        }
        if let Some(proteins) = matches.get_one::<String>("proteins") {
            log::trace!("overriding `proteins` parameter.");
            input.proteins = Some(proteins.into());
        }
        if let Some(mzml_paths) = matches.get_many::<String>("mzml_paths") {
            log::trace!("overriding `mzml_paths` parameter.");
            input.mzml_paths = Some(mzml_paths.into_iter().map(|p| p.into()).collect());
        }
        if let Some(stage) = matches.get_one::<String>("resume") {
            input.resume = Some(stage.parse()?);
        }

        ensure!(
            input.psms.is_some(),
            "`psms` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        pepquant_io::util::read_json(path).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Parameters> {
        let psms = self.psms.context("`psms` must be provided!")?;
        let quant: QuantSettings = self.quant.unwrap_or_default().try_into()?;
        let mzml_paths = self.mzml_paths.unwrap_or_default();

        let quantifies = self.resume.map_or(true, |stage| stage <= Stage::Quant);
        ensure!(
            !(quant.enabled() && quantifies && mzml_paths.is_empty()),
            "`mzml_paths` must be set when quantification is requested"
        );
        if !quant.enabled() && !mzml_paths.is_empty() {
            log::warn!("`mzml_paths` are ignored: neither `lfq` nor `tmt` quantification is enabled");
        }

        let default = Tags::default();
        let tags = Tags {
            decoy: self.decoy_tag.unwrap_or(default.decoy),
            contaminant: self.contaminant_tag.unwrap_or(default.contaminant),
        };
        if tags.decoy.is_empty() {
            log::warn!("`decoy_tag` is empty; no protein will be treated as a decoy");
        }

        if self.proteins.is_none() {
            log::warn!("no protein groups provided; every protein matched by a PSM is a candidate");
        }

        let output_directory = match self.output_directory {
            Some(path) => path.parse::<DataPath>()?,
            None => DataPath::from(std::env::current_dir()?),
        };
        output_directory.mkdir()?;

        Ok(Parameters {
            version: clap::crate_version!().into(),
            psms,
            proteins: self.proteins,
            mzml_paths,
            tags,
            quant,
            output_paths: Vec::new(),
            output_directory,
            resume: self.resume,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> Input {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults() {
        let dir = std::env::temp_dir().join(format!("pepquant-input-{}", std::process::id()));
        let mut input = parse(r#"{"psms": "psm.tsv"}"#);
        input.output_directory = Some(dir.to_string_lossy().into());
        let parameters = input.build().unwrap();

        assert_eq!(parameters.tags, Tags::default());
        assert!(!parameters.quant.enabled());
        assert_eq!(parameters.quant.lfq_settings, LfqSettings::default());
        assert_eq!(parameters.quant.tmt_settings, TmtSettings::default());
        assert!(parameters.resume.is_none());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn quant_options() {
        let options: QuantOptions = serde_json::from_str(
            r#"{
                "tmt": {"plex": 16},
                "tmt_settings": {"purity": 1.5, "remove_low": 0.05},
                "lfq": true,
                "lfq_settings": {"ppm_tolerance": -5.0}
            }"#,
        )
        .unwrap();
        let settings = QuantSettings::try_from(options).unwrap();
        assert_eq!(settings.tmt, Some(Isobaric::Tmt16));
        assert_eq!(settings.tmt_settings.purity, 1.0);
        assert_eq!(settings.tmt_settings.remove_low, 0.05);
        assert_eq!(settings.tmt_settings.min_probability, 0.7);
        assert!(settings.lfq);
        assert_eq!(settings.lfq_settings.ppm_tolerance, 5.0);
        assert_eq!(settings.lfq_settings.rt_window, 3.0);
    }

    #[test]
    fn unknown_multiplex_is_rejected() {
        let options: QuantOptions =
            serde_json::from_str(r#"{"tmt": {"brand": "itraq", "plex": 6}}"#).unwrap();
        assert!(matches!(
            QuantSettings::try_from(options),
            Err(pepquant_core::Error::UnknownMultiplex {
                brand: Brand::Itraq,
                plex: 6
            })
        ));
    }

    #[test]
    fn quantification_requires_spectra() {
        let input = parse(r#"{"psms": "psm.tsv", "quant": {"lfq": true}}"#);
        assert!(input.build().is_err());

        // Reporting from a snapshot doesn't touch the spectra
        let dir = std::env::temp_dir().join(format!("pepquant-report-{}", std::process::id()));
        let mut input = parse(r#"{"psms": "psm.tsv", "quant": {"lfq": true}}"#);
        input.output_directory = Some(dir.to_string_lossy().into());
        input.resume = Some(Stage::Report);
        assert!(input.build().is_ok());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
