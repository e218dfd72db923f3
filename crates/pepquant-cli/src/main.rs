use clap::{value_parser, Arg, Command, ValueHint};
use pepquant_cli::input::Input;
use pepquant_cli::runner::Runner;
use rayon::ThreadPoolBuilder;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("PEPQUANT_LOG", "error,pepquant=info"))
        .init();

    let matches = Command::new("pepquant")
        .version(clap::crate_version!())
        .author("Michael Lazear <michaellazear92@gmail.com>")
        .about("Protein inference, evidence roll-up and quantification from validated PSMs")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("mzml_paths")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to mzML files to quantify. Overrides mzML files listed in the \
                     configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("psms")
                .long("psms")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the tab-separated PSM table. Overrides the file \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("proteins")
                .long("proteins")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the protein group list (JSON file). Overrides the file \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where reports and evidence snapshots will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("resume")
                .long("resume")
                .value_parser(["ingest", "inference", "quant", "report"])
                .help(
                    "Restart at this stage, using the evidence persisted by the \
                     previous stage of an earlier run",
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let threads = matches
        .get_one::<u16>("threads")
        .map(|&n| n as usize)
        .unwrap_or_else(num_cpus::get);

    ThreadPoolBuilder::new().num_threads(threads).build_global()?;

    let input = Input::from_arguments(matches)?;
    let parameters = input.build()?;
    Runner::new(parameters).run()
}
