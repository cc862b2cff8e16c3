// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! # efikeysctl
//!
//! Command-line tool for inspecting and updating the UEFI Secure Boot
//! signature databases (PK, KEK, db, dbx, dbt and MokList), building
//! signature lists, and producing time-based authenticated updates, either
//! signed in one step or through a detached signing exchange with an
//! offline key custodian.

#![deny(
    nonstandard_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    unused_allocation,
    unused_comparisons,
    unused_parens
)]

mod commands;
mod config;
mod error;
mod output;

use clap::{builder::TypedValueParser, Args, Parser, Subcommand};
use log::{debug, error};
use serde_json::Value;
use std::{path::PathBuf, process};

use crate::config::{Backend, Config, OutputFormat};
use crate::error::EfikeysctlError;
use crate::output::OutputHandler;

/// Manage UEFI Secure Boot keys and signature databases
#[derive(Parser, Debug)]
#[command(
    name = "efikeysctl",
    version,
    about = "Manage UEFI Secure Boot keys and signature databases",
    after_long_help = "CONFIGURATION SOURCES (highest to lowest priority):\n  \
        1. Command-line arguments (--store, --flash-image, --signer-cert, etc.)\n  \
        2. Environment variables (EFIKEYS_STORE__BACKEND, EFIKEYS_SIGNING__KEY, etc.)\n  \
        3. Configuration file (efikeysctl.toml, ~/.config/efikeysctl/config.toml, etc.)\n  \
        4. Built-in defaults\n\n\
        EXIT CODES:\n  \
        0 success, 1 usage or general error, 2 not found, 3 permission denied,\n  \
        4 malformed input, 5 key mismatch or unauthorized signer, 6 store I/O error"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Variable store to operate on
    #[arg(long, value_enum, global = true)]
    store: Option<Backend>,

    /// efivarfs mount point, instead of the one in /proc/self/mounts
    #[arg(long, value_name = "DIR", global = true)]
    efivarfs: Option<String>,

    /// Firmware flash image holding the variable store
    #[arg(long, value_name = "FILE", global = true)]
    flash_image: Option<String>,

    /// Increase logging, may be repeated
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable logging and progress messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, value_enum, global = true)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the contents of signature database variables
    Read(ReadArgs),
    /// Change a signature database variable
    Update(UpdateArgs),
    /// Wrap a signature list in a signed authenticated envelope
    Sign(SignArgs),
    /// Start a detached signing exchange
    SignPrepare(SignPrepareArgs),
    /// Finish a detached signing exchange with the returned signature
    SignComplete(SignCompleteArgs),
    /// Convert a certificate into a signature list
    CertToEsl {
        /// Certificate, PEM or DER
        cert: PathBuf,
        /// Signature list to write
        output: PathBuf,
        /// Owner GUID of the entry
        #[arg(short = 'g', long, value_name = "GUID")]
        owner: Option<String>,
    },
    /// Convert the Authenticode hashes of EFI binaries into a signature
    /// list
    HashToEsl {
        /// EFI binaries followed by the signature list to write
        #[arg(num_args = 2.., required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Owner GUID of the entries
        #[arg(short = 'g', long, value_name = "GUID")]
        owner: Option<String>,
    },
    /// Convert a certificate into a TBS hash revocation list for dbx
    CertToHashEsl {
        /// Certificate, PEM or DER
        cert: PathBuf,
        /// Signature list to write
        output: PathBuf,
        /// Owner GUID of the entry
        #[arg(short = 'g', long, value_name = "GUID")]
        owner: Option<String>,
        /// Digest size of the TBS hash
        #[arg(
            short = 's',
            long,
            default_value_t = 256,
            value_parser = clap::builder::PossibleValuesParser::new(["256", "384", "512"])
                .map(|s| s.parse::<u16>().unwrap_or(256)),
        )]
        hash: u16,
        /// Time of revocation, "YYYY-MM-DD HH:MM:SS"
        #[arg(short = 't', long, value_name = "TIME")]
        revocation_time: Option<String>,
    },
    /// Extract the certificates of a signature list as DER files
    EslToCerts {
        /// Signature list or database to read
        esl: PathBuf,
        /// Output files are named PREFIX-N.der
        prefix: String,
    },
    /// Show whether the platform is in setup mode and enforces Secure Boot
    Status,
    /// Operate on the variable store of a firmware flash image
    Flash {
        #[command(subcommand)]
        action: FlashAction,
    },
    /// Generate a signing key and a self-signed certificate
    Keygen(KeygenArgs),
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Variable to print, PK, KEK, db and dbx when absent
    pub variable: Option<String>,
    /// Only this signature list (0-based)
    #[arg(short = 's', long, value_name = "N")]
    pub list: Option<usize>,
    /// Only this entry of the selected list (0-based)
    #[arg(short, long, value_name = "M", requires = "list")]
    pub entry: Option<usize>,
    /// Write the raw bytes to FILE instead of printing them
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Read the database from a signature list file instead of the store
    #[arg(long, value_name = "FILE")]
    pub esl: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("input")
        .required(true)
        .args(["file", "hash_binary", "cert", "delete"]),
))]
pub struct UpdateArgs {
    /// Variable to update
    pub variable: String,
    /// A pre-signed .auth file, or a signature list with --esl or a signer
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,
    /// Enroll the Authenticode SHA-256 hash of an EFI binary
    #[arg(short = 'b', long, value_name = "FILE")]
    pub hash_binary: Option<PathBuf>,
    /// Enroll a certificate, PEM or DER
    #[arg(short = 'x', long, value_name = "FILE")]
    pub cert: Option<PathBuf>,
    /// Delete signature list L, or entry E of list L
    #[arg(short, long, value_name = "L[:E]")]
    pub delete: Option<String>,
    /// Add to the variable instead of replacing it
    #[arg(short, long)]
    pub append: bool,
    /// The --file input is a signature list, not a pre-signed envelope
    #[arg(short, long)]
    pub esl: bool,
    /// Owner GUID of new entries
    #[arg(short = 'g', long, value_name = "GUID")]
    pub owner: Option<String>,
    /// Signer certificate
    #[arg(long, value_name = "FILE", requires = "signer_key")]
    pub signer_cert: Option<PathBuf>,
    /// Signer private key
    #[arg(long, value_name = "FILE", requires = "signer_cert")]
    pub signer_key: Option<PathBuf>,
    /// Use an unsigned envelope, accepted by firmware in setup mode only
    #[arg(long, conflicts_with_all = ["signer_cert", "signer_key"])]
    pub unsigned: bool,
    /// Merge an append locally and write the whole database
    #[arg(long, requires = "append")]
    pub merge_locally: bool,
    /// Envelope timestamp, "YYYY-MM-DD HH:MM:SS", now when absent
    #[arg(short, long, value_name = "TIME")]
    pub timestamp: Option<String>,
    /// Write the update to FILE instead of the store
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Variable the update is for
    pub variable: String,
    /// Signature list to sign
    #[arg(long, value_name = "FILE")]
    pub esl: PathBuf,
    /// Signer certificate, the configured one when absent
    #[arg(long, value_name = "FILE", requires = "key")]
    pub cert: Option<PathBuf>,
    /// Signer private key, the configured one when absent
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub key: Option<PathBuf>,
    /// Sign an append rather than a replacement
    #[arg(short, long)]
    pub append: bool,
    /// Envelope timestamp, "YYYY-MM-DD HH:MM:SS", now when absent
    #[arg(short, long, value_name = "TIME")]
    pub timestamp: Option<String>,
    /// Authenticated envelope to write
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct SignPrepareArgs {
    /// Variable the update is for
    pub variable: String,
    /// Signature list to sign
    #[arg(long, value_name = "FILE")]
    pub esl: PathBuf,
    /// Prepare an append rather than a replacement
    #[arg(short, long)]
    pub append: bool,
    /// Envelope timestamp, "YYYY-MM-DD HH:MM:SS", now when absent
    #[arg(short, long, value_name = "TIME")]
    pub timestamp: Option<String>,
    /// Signing bundle to write
    #[arg(short, long, value_name = "FILE")]
    pub bundle: PathBuf,
    /// Also write the raw message to sign
    #[arg(short, long, value_name = "FILE")]
    pub message: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SignCompleteArgs {
    /// Signing bundle written by sign-prepare
    #[arg(short, long, value_name = "FILE")]
    pub bundle: PathBuf,
    /// Detached PKCS#7 signature of the message, DER or PEM
    #[arg(short, long, value_name = "FILE")]
    pub signature: PathBuf,
    /// Only accept a signature made by this certificate
    #[arg(long, value_name = "FILE")]
    pub signer_cert: Option<PathBuf>,
    /// Authenticated envelope to write
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,
    /// Also write the envelope to the variable store
    #[arg(short, long)]
    pub write: bool,
}

#[derive(Subcommand, Debug)]
pub enum FlashAction {
    /// List the variables of a flash image
    List {
        /// Flash image, the configured one when absent
        image: Option<PathBuf>,
        /// Include deleted records
        #[arg(short, long)]
        all: bool,
    },
    /// Set a variable in a flash image
    Set {
        /// Flash image
        image: PathBuf,
        /// Variable name
        variable: String,
        /// Raw contents of the variable
        file: PathBuf,
        /// Owner GUID, the variable's registered GUID when absent
        #[arg(short = 'g', long, value_name = "GUID")]
        owner: Option<String>,
        /// Attribute word, hexadecimal
        #[arg(long, value_name = "HEX")]
        attributes: Option<String>,
        /// Record timestamp, "YYYY-MM-DD HH:MM:SS", now when absent
        #[arg(short, long, value_name = "TIME")]
        timestamp: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Subject and issuer common name
    #[arg(long, value_name = "CN")]
    pub common_name: String,
    /// Certificate to write, PEM
    #[arg(long, value_name = "FILE")]
    pub cert: PathBuf,
    /// Private key to write, PEM
    #[arg(long, value_name = "FILE")]
    pub key: PathBuf,
    /// Validity in days
    #[arg(long, default_value_t = 3650)]
    pub days: u32,
    /// Also write the certificate as DER to FILE
    #[arg(long, value_name = "FILE")]
    pub der: Option<PathBuf>,
    /// Encrypt the private key with this password
    #[arg(long, value_name = "PASSWORD")]
    pub key_password: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config.with_cli_overrides(&cli),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            let output = OutputHandler::new(
                cli.format.unwrap_or_default(),
                cli.quiet,
            );
            output.error(&EfikeysctlError::from(e));
            process::exit(1);
        }
    };
    debug!(
        "Using the {:?} store, output format {:?}",
        config.store.backend, config.output.format
    );

    let output = OutputHandler::new(config.output.format, cli.quiet);
    match execute_command(&cli.command, &config, &output) {
        Ok(response) => output.success(response),
        Err(e) => {
            error!("Command failed: {e}");
            output.error(&e);
            process::exit(e.exit_code());
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    pretty_env_logger::formatted_builder()
        .filter_level(log_level)
        .target(pretty_env_logger::env_logger::Target::Stderr)
        .init();
}

fn execute_command(
    command: &Commands,
    config: &Config,
    output: &OutputHandler,
) -> Result<Value, EfikeysctlError> {
    match command {
        Commands::Read(args) => commands::read::execute(args, config),
        Commands::Update(args) => {
            commands::update::execute(args, config, output)
        }
        Commands::Sign(args) => commands::sign::sign(args, config),
        Commands::SignPrepare(args) => commands::sign::prepare(args),
        Commands::SignComplete(args) => {
            commands::sign::complete(args, config, output)
        }
        Commands::CertToEsl {
            cert,
            output: out,
            owner,
        } => commands::convert::cert_to_esl(
            cert,
            out,
            owner.as_deref(),
            config,
        ),
        Commands::HashToEsl { files, owner } => {
            commands::convert::hash_to_esl(files, owner.as_deref(), config)
        }
        Commands::CertToHashEsl {
            cert,
            output: out,
            owner,
            hash,
            revocation_time,
        } => commands::convert::cert_to_hash_esl(
            &commands::convert::CertHashParams {
                cert,
                output: out,
                owner: owner.as_deref(),
                hash_bits: *hash,
                revocation_time: revocation_time.as_deref(),
            },
            config,
        ),
        Commands::EslToCerts { esl, prefix } => {
            commands::convert::esl_to_certs(esl, prefix)
        }
        Commands::Status => commands::status::execute(config),
        Commands::Flash { action } => commands::flash::execute(action, config),
        Commands::Keygen(args) => commands::keygen::execute(args),
    }
}
