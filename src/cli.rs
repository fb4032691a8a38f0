//! Command-line surface, plus clap's built-in `--version`/`--help`.

use std::path::PathBuf;

use clap::Parser;

/// Build a Protected Virtualization (Secure Execution) guest image.
#[derive(Parser, Debug)]
#[command(name = "genprotimg", version, about, long_about = None, disable_version_flag = true)]
pub struct CliArgs {
    /// Host certificate (PEM, EC/secp521r1). Repeatable; at least one required.
    #[arg(short = 'c', long = "host-certificate", required = true)]
    pub host_certificates: Vec<PathBuf>,

    /// Guest kernel image (raw binary, not ELF).
    #[arg(short = 'i', long = "image", required = true)]
    pub image: PathBuf,

    /// Optional initial ramdisk.
    #[arg(short = 'r', long = "ramdisk")]
    pub ramdisk: Option<PathBuf>,

    /// Optional kernel command line file.
    #[arg(short = 'p', long = "parmfile")]
    pub parmfile: Option<PathBuf>,

    /// Output image path.
    #[arg(short = 'o', long = "output", required = true)]
    pub output: PathBuf,

    /// Override the 32-byte header (root) key instead of generating one.
    #[arg(long = "header-key")]
    pub header_key: Option<PathBuf>,

    /// Override the 64-byte payload (XTS) key instead of generating one.
    #[arg(long = "comp-key")]
    pub comp_key: Option<PathBuf>,

    /// Override the 32-byte customer communication key instead of generating one.
    #[arg(long = "x-comm-key")]
    pub comm_key: Option<PathBuf>,

    /// Override the plaintext control flags (hex).
    #[arg(long = "x-pcf")]
    pub pcf: Option<String>,

    /// Override the secret control flags (hex).
    #[arg(long = "x-scf")]
    pub scf: Option<String>,

    /// Override the initial PSW mask (hex).
    #[arg(long = "x-psw")]
    pub psw: Option<String>,

    /// Disable host-certificate trust verification. Currently mandatory:
    /// this tool has no trust-root loader yet (see DESIGN.md).
    #[arg(long = "no-cert-check")]
    pub no_cert_check: bool,

    /// Increase logging verbosity; may be repeated.
    #[arg(short = 'V', action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Print version information and exit. Handled explicitly in `main`
    /// (not clap's `action = Version`) since `-V` is already taken by
    /// `verbosity`.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    pub version: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_required_arguments() {
        let args = CliArgs::parse_from([
            "genprotimg",
            "-c",
            "host.pem",
            "-i",
            "kernel.img",
            "-o",
            "out.img",
        ]);
        assert_eq!(args.host_certificates, vec![PathBuf::from("host.pem")]);
        assert_eq!(args.image, PathBuf::from("kernel.img"));
        assert_eq!(args.output, PathBuf::from("out.img"));
        assert!(args.ramdisk.is_none());
        assert!(!args.no_cert_check);
    }

    #[test]
    fn rejects_missing_host_certificate() {
        let result = CliArgs::try_parse_from(["genprotimg", "-i", "kernel.img", "-o", "out.img"]);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_repeated_host_certificates_and_verbosity() {
        let args = CliArgs::parse_from([
            "genprotimg",
            "-c",
            "a.pem",
            "-c",
            "b.pem",
            "-i",
            "kernel.img",
            "-o",
            "out.img",
            "-VV",
        ]);
        assert_eq!(args.host_certificates.len(), 2);
        assert_eq!(args.verbosity, 2);
        assert!(!args.version);
    }

    #[test]
    fn lowercase_v_sets_version_and_uppercase_v_sets_verbosity() {
        let args = CliArgs::parse_from([
            "genprotimg", "-c", "a.pem", "-i", "kernel.img", "-o", "out.img", "-v",
        ]);
        assert!(args.version);
        assert_eq!(args.verbosity, 0);

        let args = CliArgs::parse_from([
            "genprotimg", "-c", "a.pem", "-i", "kernel.img", "-o", "out.img", "-V",
        ]);
        assert!(!args.version);
        assert_eq!(args.verbosity, 1);
    }
}
