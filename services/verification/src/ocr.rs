use std::{
    io::{ErrorKind, Write},
    process::{Command, Stdio},
};

use thiserror::Error;
use tracing::debug;

pub const DEFAULT_OCR_PROGRAM: &str = "tesseract";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr program not found: {0}")]
    MissingProgram(String),
    #[error("ocr io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ocr program exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("ocr produced no text")]
    EmptyOutput,
}

/// Turns certificate image bytes into raw text.
pub trait OcrProvider: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

impl<F> OcrProvider for F
where
    F: Fn(&[u8]) -> Result<String, OcrError> + Send + Sync,
{
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        self(image)
    }
}

/// Runs an external `tesseract` binary, streaming the image over stdin and
/// reading the text from stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesseractCommand {
    program: String,
    lang: Option<String>,
}

impl Default for TesseractCommand {
    fn default() -> Self {
        Self::new(DEFAULT_OCR_PROGRAM, None)
    }
}

impl TesseractCommand {
    pub fn new(program: impl Into<String>, lang: Option<String>) -> Self {
        Self {
            program: program.into(),
            lang: lang.filter(|lang| !lang.trim().is_empty()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("stdin").arg("stdout");
        if let Some(lang) = &self.lang {
            command.arg("-l").arg(lang);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl OcrProvider for TesseractCommand {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = self.command().spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound => OcrError::MissingProgram(self.program.clone()),
            _ => OcrError::Io(err),
        })?;

        // feed stdin concurrently; the child may fill stdout before it has
        // drained its input
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Io(std::io::Error::other("ocr stdin unavailable")))?;
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(image));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("ocr stdin writer panicked")));
            (written, output)
        });
        let output = output?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // a clean exit may close stdin before the whole image was written
        if let Err(err) = written
            && err.kind() != ErrorKind::BrokenPipe
        {
            return Err(OcrError::Io(err));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            program = %self.program,
            image_bytes = image.len(),
            text_bytes = text.len(),
            "ocr recognized image"
        );
        if text.trim().is_empty() {
            return Err(OcrError::EmptyOutput);
        }
        Ok(text)
    }
}
