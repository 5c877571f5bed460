use std::io::Write;
use std::path::PathBuf;

use burn::config::Config;
use burn::tensor::backend::Backend;
use clap::{Args, Parser, Subcommand};

use crate::backend::{BackendTask, CpuBackend, DevicePreference, dispatch};
use crate::checkpoint::{LoadArgs, LoadReport, read_state_dict};
use crate::error::Error;
use crate::model::UNetConfig;
use crate::onnx::{ExportConfig, ExportSummary};
use crate::predictor::Predictor;

pub const DEFAULT_CHECKPOINT: &str = "../checkpoints/ScribblePrompt_unet_v1_nf192_res128.pt";
pub const DEFAULT_OUTPUT: &str = "scribbleprompt_unet.onnx";

/// Export ScribblePrompt UNet checkpoints to ONNX.
///
/// Without a subcommand, the default checkpoint is exported with the default settings.
#[derive(Parser, Debug)]
#[command(name = "scribble-export", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log debug messages.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a checkpoint and write it as an ONNX graph.
    Export(ExportArgs),
    /// List the tensors of a checkpoint and how they match the network.
    Inspect(InspectArgs),
}

/// A `PATTERN=REPLACEMENT` key remapping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRemap {
    pub pattern: String,
    pub replacement: String,
}

fn parse_key_remap(value: &str) -> Result<KeyRemap, String> {
    match value.split_once('=') {
        Some((pattern, replacement)) if !pattern.is_empty() => Ok(KeyRemap {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }),
        _ => Err(format!("expected PATTERN=REPLACEMENT, got '{value}'")),
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckpointArgs {
    /// Checkpoint file (.pt, .pth, .bin, .ckpt or .safetensors).
    #[arg(long, default_value = DEFAULT_CHECKPOINT)]
    pub checkpoint: PathBuf,

    /// Entry of the checkpoint holding the state dict, e.g. `state_dict`.
    #[arg(long)]
    pub top_level_key: Option<String>,

    /// Rename checkpoint keys before matching, e.g. `module\.(.*)=$1`. Can be repeated.
    #[arg(long, value_name = "PATTERN=REPLACEMENT", value_parser = parse_key_remap)]
    pub key_remap: Vec<KeyRemap>,

    /// Tolerate missing and unexpected keys.
    #[arg(long)]
    pub non_strict: bool,
}

impl Default for CheckpointArgs {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from(DEFAULT_CHECKPOINT),
            top_level_key: None,
            key_remap: Vec::new(),
            non_strict: false,
        }
    }
}

impl CheckpointArgs {
    pub fn load_args(&self) -> Result<LoadArgs, Error> {
        let mut args = LoadArgs::new(self.checkpoint.clone()).with_strict(!self.non_strict);

        if let Some(key) = &self.top_level_key {
            args = args.with_top_level_key(key);
        }
        for rule in self.key_remap.iter() {
            args = args.with_key_remap(&rule.pattern, &rule.replacement)?;
        }

        Ok(args)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub checkpoint: CheckpointArgs,

    /// Destination of the ONNX graph.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// JSON export configuration. Command line flags take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub opset: Option<usize>,

    /// Keep the shape computations in the graph even when their result is static.
    #[arg(long)]
    pub no_constant_folding: bool,

    /// Declare the weights as graph inputs instead of storing them.
    #[arg(long)]
    pub no_export_params: bool,

    #[arg(long, value_enum, default_value_t = DevicePreference::Auto)]
    pub device: DevicePreference,
}

impl Default for ExportArgs {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointArgs::default(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            config: None,
            opset: None,
            no_constant_folding: false,
            no_export_params: false,
            device: DevicePreference::Auto,
        }
    }
}

impl ExportArgs {
    /// The configuration file, if any, with the command line overrides applied.
    pub fn export_config(&self) -> Result<ExportConfig, Error> {
        let mut config = match &self.config {
            Some(path) => ExportConfig::load(path)?,
            None => ExportConfig::new(),
        };

        if let Some(opset) = self.opset {
            config.opset_version = opset;
        }
        if self.no_constant_folding {
            config.do_constant_folding = false;
        }
        if self.no_export_params {
            config.export_params = false;
        }

        Ok(config)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct InspectArgs {
    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

struct ExportTask {
    load_args: LoadArgs,
    config: ExportConfig,
    output: PathBuf,
    verbose: bool,
}

impl BackendTask for ExportTask {
    type Output = Result<ExportSummary, Error>;

    fn run<B: Backend>(self, device: B::Device) -> Self::Output {
        let predictor = Predictor::<B>::new(&self.load_args, &device, self.verbose)?;
        predictor.export_to_onnx(&self.output, &self.config)
    }
}

/// Execute the parsed command line.
pub fn run(cli: Cli) -> Result<(), Error> {
    let verbose = !cli.quiet;

    match cli.command.unwrap_or_else(|| Command::Export(ExportArgs::default())) {
        Command::Export(args) => export(args, verbose),
        Command::Inspect(args) => inspect(args),
    }
}

fn export(args: ExportArgs, verbose: bool) -> Result<(), Error> {
    let task = ExportTask {
        load_args: args.checkpoint.load_args()?,
        config: args.export_config()?,
        output: args.output.clone(),
        verbose,
    };

    let summary = dispatch(args.device, task)?;

    log::info!(
        "Wrote {} nodes and {} initializers ({} parameters, opset {})",
        summary.nodes,
        summary.initializers,
        summary.parameters,
        summary.opset_version
    );
    log::info!(
        "Graph signature: input {} -> output {}",
        summary.input_shape,
        summary.output_shape
    );

    Ok(())
}

fn inspect(args: InspectArgs) -> Result<(), Error> {
    let load_args = args.checkpoint.load_args()?;
    let stdout = std::io::stdout();

    inspect_checkpoint(&load_args, &UNetConfig::new(), &mut stdout.lock())?;

    Ok(())
}

/// Write the tensors of a checkpoint and how they match the network built from `config`.
///
/// The listing and the report are written before the strict check, so a failing checkpoint
/// still shows what it holds.
pub fn inspect_checkpoint<W: Write>(
    load_args: &LoadArgs,
    config: &UNetConfig,
    out: &mut W,
) -> Result<LoadReport, Error> {
    let state = read_state_dict(load_args)?;

    writeln!(out, "{} ({} tensors)", load_args.file.display(), state.len())?;
    for (name, tensor) in state.iter() {
        writeln!(out, "  {name}: {:?}", tensor.shape)?;
    }

    let model = config.init::<CpuBackend>(&Default::default());
    let report = state.verify(&model.parameter_specs());
    writeln!(out, "{report}")?;

    Ok(report.check(load_args.strict)?)
}
