//! # `elt` - ELF Table tool

mod report;

use anyhow::{bail, Context};
use argh::FromArgs;
use std::{fs, path::PathBuf};
use tabelf::ElfFile;

/// Dump the dynamic tables of an ELF object, and optionally write it back
/// out re-encoded.
#[derive(FromArgs)]
struct Args {
    /// the ELF object to read
    #[argh(positional)]
    input: PathBuf,

    /// where to write the re-encoded object
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// fail if any error diagnostic was reported
    #[argh(switch)]
    strict: bool,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let input = fs::read(&args.input)
        .with_context(|| format!("could not read {}", args.input.display()))?;

    println!("Analyzing {}...", args.input.display());
    let (mut file, diagnostics) = ElfFile::parse(input)
        .with_context(|| format!("{} is not a readable ELF object", args.input.display()))?;

    report::print(&file);

    if !diagnostics.is_empty() {
        println!("\n{} diagnostic(s):", diagnostics.len());
        print!("{}", diagnostics);
    }

    if args.strict && diagnostics.has_errors() {
        bail!("{} has malformed tables", args.input.display());
    }

    if let Some(output) = &args.output {
        let image = file.write()?;
        fs::write(output, &image)
            .with_context(|| format!("could not write {}", output.display()))?;
        println!("\nWrote {} bytes to {}", image.len(), output.display());
    }

    Ok(())
}
