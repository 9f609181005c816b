use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::path::PathBuf;
use zeroize::Zeroizing;

use kodegen_bundler_provision::config::{
    DEFAULT_KEYCHAIN, DEFAULT_MIN_PROFILE_DAYS_VALID, DistributionType, ProvisionConfig,
};
use kodegen_bundler_provision::{ProvisionError, detail, error, info, log, success};

// Decorative output (colors, status lines) ignores write errors inside the
// log macros. Everything the run depends on propagates with `?`.

#[derive(Parser)]
#[command(name = "kodegen_provision")]
#[command(version, about = "Provision code signing for an Xcode project")]
struct Cli {
    /// Path to config file (TOML); replaces the per-value flags
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Build URL serving the developer portal connection
    #[arg(long, env = "BITRISE_BUILD_URL", default_value = "")]
    build_url: String,

    /// Build API token
    #[arg(long, env = "BITRISE_BUILD_API_TOKEN", default_value = "", hide_env_values = true)]
    build_api_token: String,

    /// Team id, overrides the project's team
    #[arg(long, env = "TEAM_ID")]
    team_id: Option<String>,

    /// `|`-separated certificate URLs
    #[arg(long, env = "CERTIFICATE_URL_LIST", default_value = "")]
    certificate_urls: String,

    /// `|`-separated certificate passphrases, aligned with the URLs
    #[arg(long, env = "PASSPHRASE_LIST", default_value = "", hide_env_values = true)]
    passphrases: String,

    /// development, ad-hoc, app-store or enterprise
    #[arg(long, env = "DISTRIBUTION_TYPE", default_value = "development")]
    distribution_type: DistributionType,

    /// Path to the .xcodeproj bundle
    #[arg(long, env = "PROJECT_PATH", default_value = "")]
    project_path: PathBuf,

    /// Target to sign, defaults to the first application target
    #[arg(long, env = "MAIN_TARGET")]
    main_target: Option<String>,

    /// Build configuration, defaults to the project's default configuration
    #[arg(long, env = "CONFIGURATION")]
    configuration: Option<String>,

    /// Register the account's test devices on the developer portal
    #[arg(long, env = "REGISTER_TEST_DEVICES", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    register_test_devices: bool,

    /// Generate missing or expiring profiles
    #[arg(long, env = "GENERATE_PROFILES", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    generate_profiles: bool,

    /// Regenerate profiles expiring within this many days
    #[arg(long, env = "MIN_PROFILE_DAYS_VALID", default_value_t = DEFAULT_MIN_PROFILE_DAYS_VALID)]
    min_profile_days_valid: u32,

    /// Keychain to install certificates into
    #[arg(long, env = "KEYCHAIN_PATH", default_value = DEFAULT_KEYCHAIN)]
    keychain_path: PathBuf,

    /// Keychain password
    #[arg(long, env = "KEYCHAIN_PASSWORD", default_value = "", hide_env_values = true)]
    keychain_password: String,

    /// Directory to write provisioning profiles to
    #[arg(long, env = "PROFILES_DIR")]
    profiles_dir: Option<PathBuf>,

    /// Show debug output
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Resolve everything without writing anywhere
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn into_config(self) -> ProvisionConfig {
        ProvisionConfig {
            build_url: self.build_url,
            build_api_token: Zeroizing::new(self.build_api_token),
            team_id: self.team_id,
            certificate_urls: self.certificate_urls,
            passphrases: Zeroizing::new(self.passphrases),
            distribution_type: self.distribution_type,
            project_path: self.project_path,
            main_target: self.main_target,
            configuration: self.configuration,
            register_test_devices: self.register_test_devices,
            generate_profiles: self.generate_profiles,
            min_profile_days_valid: self.min_profile_days_valid,
            keychain_path: self.keychain_path,
            keychain_password: Zeroizing::new(self.keychain_password),
            profiles_dir: self.profiles_dir,
            dry_run: self.dry_run,
            verbose: self.verbose,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    log::set_verbose(cli.verbose);

    if let Err(e) = run(cli).await {
        report_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (dry_run, verbose) = (cli.dry_run, cli.verbose);
    let mut config = match cli.config.clone() {
        Some(path) => ProvisionConfig::from_toml_file(&path).await?,
        None => cli.into_config(),
    };
    config.dry_run |= dry_run;
    config.verbose |= verbose;
    log::set_verbose(config.verbose);

    print_params(&config);

    let report = kodegen_bundler_provision::run(&config).await?;

    info!("Summary");
    detail!("team: {}", report.team_id);
    detail!("distribution types: {:?}", report.distribution_types);
    detail!("managed signing: {}", report.managed_signing);
    detail!("profiles resolved: {}", report.profiles.len());
    success!("code signing provisioned");
    Ok(())
}

fn print_params(config: &ProvisionConfig) {
    let secret = |value: &str| if value.is_empty() { "" } else { "***" };

    info!("Params");
    detail!("build_url: {}", config.build_url);
    detail!("build_api_token: {}", secret(config.build_api_token.as_str()));
    detail!("team_id: {}", config.team_id.as_deref().unwrap_or(""));
    detail!("certificate_urls: {}", secret(config.certificate_urls.as_str()));
    detail!("passphrases: {}", secret(config.passphrases.as_str()));
    detail!("distribution_type: {}", config.distribution_type);
    detail!("project_path: {}", config.project_path.display());
    detail!("main_target: {}", config.main_target.as_deref().unwrap_or(""));
    detail!("configuration: {}", config.configuration.as_deref().unwrap_or(""));
    detail!("register_test_devices: {}", config.register_test_devices);
    detail!("generate_profiles: {}", config.generate_profiles);
    detail!("min_profile_days_valid: {}", config.min_profile_days_valid);
    detail!("keychain_path: {}", config.keychain_path.display());
    detail!("keychain_password: {}", secret(config.keychain_password.as_str()));
    detail!("dry_run: {}", config.dry_run);
}

fn report_error(e: &anyhow::Error) {
    let category = e
        .downcast_ref::<ProvisionError>()
        .map(ProvisionError::category)
        .unwrap_or("internal");

    error!("Error ({category}):");
    error!("{e}");
    for cause in e.chain().skip(1) {
        error!("  caused by: {cause}");
    }

    error!("Stacktrace (for debugging):");
    error!("{}", stacktrace(e));
}

/// The error's own backtrace when `RUST_BACKTRACE` captured one, otherwise
/// one taken at the reporting site
fn stacktrace(e: &anyhow::Error) -> String {
    let backtrace = e.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        backtrace.to_string()
    } else {
        Backtrace::force_capture().to_string()
    }
}
