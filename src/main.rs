//! Trains the two CIFAR10 network variants and reports their accuracy.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use cifar_convnet::config::TrainConfig;
use cifar_convnet::logging::init_logging;
use cifar_convnet::models::Architecture;
use cifar_convnet::trainer::{evaluate, sample_predictions, train};
use cifar_convnet::utils::cifar::{self, class_name, CifarData, Split};
use cifar_convnet::utils::nn_trait::DataSet;
use cifar_convnet::utils::optimizer::Sgd;
use cifar_convnet::utils::transform::Normalize;

#[derive(Parser, Debug)]
#[command(name = "cifar_convnet")]
#[command(version)]
#[command(about = "Train convolutional networks on CIFAR10", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and extract CIFAR10 into the cache directory
    Download {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Save a grid of training images and print their labels
    Preview {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "4")]
        count: usize,

        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
    },

    /// Train one or both variants and report overall and per-class accuracy
    Train {
        /// TOML file with training settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "both")]
        arch: ArchChoice,

        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f32>,

        #[arg(short, long)]
        momentum: Option<f32>,

        #[arg(long)]
        seed: Option<u64>,

        /// Use only the first N training and test images
        #[arg(long)]
        limit: Option<usize>,

        /// Fail instead of downloading a missing dataset
        #[arg(long, default_value = "false")]
        no_download: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ArchChoice {
    Lenet,
    Deep,
    Both,
}

impl ArchChoice {
    fn architectures(self) -> Vec<Architecture> {
        match self {
            ArchChoice::Lenet => vec![Architecture::Lenet],
            ArchChoice::Deep => vec![Architecture::Deep],
            ArchChoice::Both => Architecture::all().to_vec(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Download { data_dir } => {
            let dir = cifar::download(&data_dir).context("Failed to download CIFAR10")?;
            info!(dir = %dir.display(), "CIFAR10 ready");
        }
        Commands::Preview {
            data_dir,
            count,
            output,
        } => {
            let norm = Normalize::default();
            let mut data = CifarData::load(&data_dir, Split::Train, Some(count))
                .context("Failed to load training images")?;
            data.normalize(&norm);
            let indices: Vec<usize> = (0..data.len()).collect();
            data.save_image_grid(&indices, 8, &norm, &output)
                .context("Failed to write preview grid")?;
            let names: Vec<&str> = data.labels().iter().map(|l| class_name(*l as usize)).collect();
            println!("{}", names.join(" "));
        }
        Commands::Train {
            config,
            arch,
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            momentum,
            seed,
            limit,
            no_download,
        } => {
            let mut cfg = match config {
                Some(path) => TrainConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => TrainConfig::default(),
            };
            if let Some(v) = data_dir {
                cfg.data_dir = v;
            }
            if let Some(v) = epochs {
                cfg.epochs = v;
            }
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = learning_rate {
                cfg.learning_rate = v;
            }
            if let Some(v) = momentum {
                cfg.momentum = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if limit.is_some() {
                cfg.train_limit = limit;
                cfg.test_limit = limit;
            }
            cfg.validate().context("Invalid training configuration")?;
            run_training(&cfg, &arch.architectures(), !no_download)?;
        }
    }
    Ok(())
}

fn run_training(cfg: &TrainConfig, architectures: &[Architecture], allow_download: bool) -> Result<()> {
    if allow_download {
        cifar::download(&cfg.data_dir).context("Failed to download CIFAR10")?;
    }
    let norm = Normalize::default();
    let mut train_set = CifarData::load(&cfg.data_dir, Split::Train, cfg.train_limit)
        .context("Failed to load training set")?;
    let mut test_set = CifarData::load(&cfg.data_dir, Split::Test, cfg.test_limit)
        .context("Failed to load test set")?;
    train_set.normalize(&norm);
    test_set.normalize(&norm);

    for &architecture in architectures {
        let mut network = architecture
            .build(cfg.dropout, cfg.seed)
            .with_context(|| format!("Failed to build {}", architecture))?;
        info!(
            arch = %architecture,
            parameters = network.num_parameters(),
            "built network"
        );
        for line in network.summary() {
            info!("  {}", line);
        }

        let sgd = Sgd::new(cfg.learning_rate, cfg.momentum, cfg.weight_decay);
        train(&mut network, &sgd, &train_set, cfg)
            .with_context(|| format!("Training {} failed", architecture))?;

        let (truth, predicted) = sample_predictions(&mut network, &test_set, cfg.batch_size)?;
        println!("GroundTruth: {}", truth.join(" "));
        println!("Predicted:   {}", predicted.join(" "));

        let accuracy = evaluate(&mut network, &test_set, cfg.eval_batch_size)?;
        println!(
            "[{}] Accuracy of the network on the {} test images: {:.0} %",
            architecture,
            accuracy.total(),
            accuracy.accuracy()
        );
        for line in accuracy.report_lines() {
            println!("[{}] {}", architecture, line);
        }
    }
    Ok(())
}
