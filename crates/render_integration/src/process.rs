use std::{
    io::{self, Write},
    path::Path,
    process::{ChildStdin, Command, Stdio},
};

use anyhow::{bail, Context};
use image::Rgb32FImage;
use tracing::info;

use crate::{encode_png, DeepDreamEngine};

/// Runs an external renderer as a child process.
///
/// The image is written to the child's stdin as PNG and the child is invoked
/// as `<program> <args..> --layer <layer> --unit <unit> --output <destination>`.
/// It must write the transformed image to the destination and exit with status 0.
/// Whatever it prints on stderr is captured and reported on failure.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("render command is empty");
        };
        if program.trim().is_empty() {
            bail!("render command is empty");
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl DeepDreamEngine for ProcessEngine {
    fn render(
        &self,
        image: &Rgb32FImage,
        destination: &Path,
        layer: &str,
        unit: u32,
    ) -> anyhow::Result<()> {
        let png = encode_png(image).context("failed to encode render input")?;

        info!(program = %self.program, %layer, unit, "starting render process");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--layer")
            .arg(layer)
            .arg("--unit")
            .arg(unit.to_string())
            .arg("--output")
            .arg(destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start render command '{}'", self.program))?;

        let stdin = child
            .stdin
            .take()
            .context("render process stdin unavailable")?;
        // Feed stdin from its own thread so a child that fills its stderr pipe
        // before reading input cannot block both processes.
        let (output, fed) = std::thread::scope(|scope| {
            let feeder = scope.spawn(move || feed_stdin(stdin, &png));
            let output = child.wait_with_output();
            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (output, fed)
        });

        let output = output.context("failed to wait for render process")?;
        if !output.status.success() {
            bail!(
                "render command '{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        fed.context("failed to send image to render process")?;
        Ok(())
    }
}

// A child that exits without reading all of its input is judged by its exit
// status alone.
fn feed_stdin(mut stdin: ChildStdin, png: &[u8]) -> io::Result<()> {
    match stdin.write_all(png) {
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
}
