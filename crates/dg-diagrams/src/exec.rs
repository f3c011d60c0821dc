//! External-process engine invocation.
//!
//! [`ExecRenderer`] drives one render through an external program: the
//! source is written to an input file in a fresh temporary work directory,
//! the program is spawned with the language's argument template, stdout and
//! stderr are captured, and the expected output artifact is read back.
//!
//! Failure semantics: a non-zero exit or a missing output file is a hard
//! failure for the block, carrying the captured stderr. Execution has a
//! bounded wall-clock budget; on overrun the process is killed and the
//! render fails with a timeout diagnostic. The work directory is dropped in
//! every case, so cancellation can never leak a partial artifact anywhere a
//! reader could see it.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::language::{Language, MimeType};
use crate::options::OptValue;
use crate::registry::{RenderError, Rendered, Renderer};
use crate::resolve::EngineConfig;

/// Interval between child exit polls.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cap on captured stderr carried into diagnostics.
const MAX_STDERR: usize = 8 * 1024;

/// Stem of the input/output files in the work directory.
const WORK_STEM: &str = "diagram";

/// Executable-backed renderer for one built-in language.
#[derive(Debug)]
pub struct ExecRenderer {
    language: Language,
}

impl ExecRenderer {
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Argument template for one invocation.
    ///
    /// Engine-specific options are passed as `--key=value` arguments
    /// (`--key` alone for a bare `true`; `false` omits the flag), placed
    /// before the positional paths.
    fn args(&self, config: &EngineConfig, input: &Path, output: &Path) -> Vec<OsString> {
        let fmt = config.format.extension();
        let mut args: Vec<OsString> = Vec::new();

        match self.language {
            Language::PlantUml => {
                args.push(format!("-t{fmt}").into());
                args.extend(option_args(&config.options));
                args.push(input.into());
            }
            Language::Mermaid => {
                args.extend(option_args(&config.options));
                args.push("-i".into());
                args.push(input.into());
                args.push("-o".into());
                args.push(output.into());
            }
            Language::Graphviz => {
                args.push(format!("-T{fmt}").into());
                args.extend(option_args(&config.options));
                args.push("-o".into());
                args.push(output.into());
                args.push(input.into());
            }
            Language::D2 => {
                args.extend(option_args(&config.options));
                args.push(input.into());
                args.push(output.into());
            }
            Language::Asymptote => {
                args.push("-f".into());
                args.push(fmt.into());
                args.extend(option_args(&config.options));
                args.push("-o".into());
                args.push(output.into());
                args.push(input.into());
            }
        }
        args
    }
}

impl Renderer for ExecRenderer {
    fn render(&self, source: &str, config: &EngineConfig) -> Result<Rendered, RenderError> {
        let work = TempDir::new()?;
        let input = work
            .path()
            .join(format!("{WORK_STEM}.{}", self.language.input_extension()));
        let output = work
            .path()
            .join(format!("{WORK_STEM}.{}", config.format.extension()));
        std::fs::write(&input, source)?;

        let mut child = Command::new(&config.exec_path)
            .args(self.args(config, &input, &output))
            .current_dir(work.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::ExecNotFound(config.exec_path.clone())
                } else {
                    RenderError::Io(e)
                }
            })?;

        tracing::debug!(
            language = self.language.id(),
            exec = %config.exec_path,
            format = config.format.extension(),
            "invoking diagram engine"
        );

        let (status, stderr) = wait_with_timeout(&mut child, config.timeout)?;
        if !status.success() {
            return Err(RenderError::EngineFailed {
                status: status.code().unwrap_or(-1),
                stderr,
            });
        }

        let payload = read_output(&output, config.format).ok_or_else(|| {
            RenderError::MissingOutput {
                expected: format!("{WORK_STEM}.{}", config.format.extension()),
                stderr,
            }
        })?;

        Ok(Rendered {
            mime: config.format,
            payload,
        })
    }
}

/// Render the pass-through options as command-line arguments.
fn option_args(options: &std::collections::BTreeMap<String, OptValue>) -> Vec<OsString> {
    options
        .iter()
        .filter_map(|(key, value)| match value {
            OptValue::Bool(false) => None,
            OptValue::Bool(true) => Some(format!("--{key}").into()),
            other => Some(format!("--{key}={other}").into()),
        })
        .collect()
}

/// Wait for the child within `timeout`, draining stdout/stderr.
///
/// The pipes are drained on reader threads so a chatty engine can never
/// fill a pipe buffer and stall against our poll loop. On overrun the child
/// is killed and reaped before returning.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<(ExitStatus, String), RenderError> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || drain(stdout));
    let stderr_reader = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                // The readers finish once the pipes close on kill.
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(RenderError::Timeout(timeout));
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    let _ = stdout_reader.join();
    let mut stderr_bytes = stderr_reader.join().unwrap_or_default();
    stderr_bytes.truncate(MAX_STDERR);
    let stderr = String::from_utf8_lossy(&stderr_bytes).trim().to_owned();
    Ok((status, stderr))
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// Read the expected output artifact, tolerating engines that append their
/// own extension (e.g. `diagram.svg.svg`).
fn read_output(output: &Path, format: MimeType) -> Option<Vec<u8>> {
    if let Ok(payload) = std::fs::read(output) {
        return Some(payload);
    }
    let mut doubled = output.as_os_str().to_owned();
    doubled.push(format!(".{}", format.extension()));
    std::fs::read(doubled).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use dg_config::Config;

    use crate::options::DiagramBlock;
    use crate::resolve;

    fn resolved(language: Language) -> EngineConfig {
        let block = DiagramBlock {
            language,
            source: String::new(),
            block_options: Vec::new(),
            inline_options: Vec::new(),
        };
        resolve::resolve(&Config::default(), &block).unwrap().config
    }

    fn to_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_plantuml_args() {
        let renderer = ExecRenderer::new(Language::PlantUml);
        let config = resolved(Language::PlantUml);
        let args = renderer.args(
            &config,
            Path::new("/work/diagram.puml"),
            Path::new("/work/diagram.svg"),
        );
        assert_eq!(to_strings(&args), vec!["-tsvg", "/work/diagram.puml"]);
    }

    #[test]
    fn test_graphviz_args_with_options() {
        let renderer = ExecRenderer::new(Language::Graphviz);
        let mut config = resolved(Language::Graphviz);
        config.options = BTreeMap::from([
            ("dpi".to_owned(), OptValue::Int(96)),
            ("verbose".to_owned(), OptValue::Bool(true)),
            ("quiet".to_owned(), OptValue::Bool(false)),
        ]);

        let args = renderer.args(
            &config,
            Path::new("/work/diagram.dot"),
            Path::new("/work/diagram.svg"),
        );
        assert_eq!(
            to_strings(&args),
            vec![
                "-Tsvg",
                "--dpi=96",
                "--verbose",
                "-o",
                "/work/diagram.svg",
                "/work/diagram.dot"
            ]
        );
    }

    #[test]
    fn test_mermaid_args() {
        let renderer = ExecRenderer::new(Language::Mermaid);
        let mut config = resolved(Language::Mermaid);
        config.format = MimeType::Png;

        let args = renderer.args(
            &config,
            Path::new("/work/diagram.mmd"),
            Path::new("/work/diagram.png"),
        );
        assert_eq!(
            to_strings(&args),
            vec!["-i", "/work/diagram.mmd", "-o", "/work/diagram.png"]
        );
    }

    #[test]
    fn test_exec_not_found() {
        let renderer = ExecRenderer::new(Language::D2);
        let mut config = resolved(Language::D2);
        config.exec_path = "/nonexistent/dg-test-binary".to_owned();

        let err = renderer.render("a -> b", &config).unwrap_err();
        assert!(matches!(err, RenderError::ExecNotFound(_)));
        assert!(err.is_environment());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Install a fake engine script and point a resolved config at it.
        fn fake_engine(script: &str) -> (tempfile::TempDir, EngineConfig) {
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("engine");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            let mut config = resolved(Language::Graphviz);
            config.exec_path = path.to_string_lossy().into_owned();
            (dir, config)
        }

        /// Copies the input to the output path: `-Tsvg --… -o OUT IN`.
        const COPY_ENGINE: &str = "#!/bin/sh\nwhile [ $# -gt 2 ]; do shift; done\ncat \"$2\" > \"$1\"\n";

        #[test]
        fn test_successful_render_reads_output() {
            let (_dir, config) = fake_engine(COPY_ENGINE);
            let renderer = ExecRenderer::new(Language::Graphviz);

            let rendered = renderer.render("digraph { a -> b }", &config).unwrap();
            assert_eq!(rendered.mime, MimeType::Svg);
            assert_eq!(rendered.payload, b"digraph { a -> b }");
        }

        #[test]
        fn test_nonzero_exit_captures_stderr() {
            let (_dir, config) =
                fake_engine("#!/bin/sh\necho 'syntax error near token' >&2\nexit 3\n");
            let renderer = ExecRenderer::new(Language::Graphviz);

            let err = renderer.render("digraph {", &config).unwrap_err();
            match err {
                RenderError::EngineFailed { status, stderr } => {
                    assert_eq!(status, 3);
                    assert!(stderr.contains("syntax error near token"));
                }
                other => panic!("expected EngineFailed, got {other:?}"),
            }
        }

        #[test]
        fn test_missing_output_is_failure() {
            let (_dir, config) = fake_engine("#!/bin/sh\nexit 0\n");
            let renderer = ExecRenderer::new(Language::Graphviz);

            let err = renderer.render("digraph {}", &config).unwrap_err();
            assert!(matches!(err, RenderError::MissingOutput { .. }));
        }

        #[test]
        fn test_timeout_kills_engine() {
            let (_dir, mut config) = fake_engine("#!/bin/sh\nexec sleep 30\n");
            config.timeout = Duration::from_millis(200);
            let renderer = ExecRenderer::new(Language::Graphviz);

            let start = Instant::now();
            let err = renderer.render("digraph {}", &config).unwrap_err();
            assert!(matches!(err, RenderError::Timeout(_)));
            // Must return promptly after the budget, not after the sleep.
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn test_doubled_extension_output_found() {
            // Engines like asy append their own extension.
            let script = "#!/bin/sh\nwhile [ $# -gt 2 ]; do shift; done\ncat \"$2\" > \"$1.svg\"\n";
            let (_dir, config) = fake_engine(script);
            let renderer = ExecRenderer::new(Language::Graphviz);

            let rendered = renderer.render("digraph {}", &config).unwrap();
            assert_eq!(rendered.payload, b"digraph {}");
        }
    }
}
