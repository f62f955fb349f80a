//! Driving the external UI renderer.
//!
//! The renderer is a MicroPython script that draws a UI, saves it as
//! `screenshot.jpg` in its working directory and writes the widget boxes to
//! `screenshot.txt`. Each invocation is moved out of the working directory
//! under a unique name before the next one overwrites it.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::dataset::{move_file, FilePair};
use crate::error::DatasetError;
use crate::label::ClassTable;

/// Environment variable naming the MicroPython binary.
pub const BIN_ENV: &str = "MICROPYTHON_BIN";
/// Environment variable naming the renderer script.
pub const SCRIPT_ENV: &str = "MICROPYTHON_MAIN";

const SCREENSHOT_IMAGE: &str = "screenshot.jpg";
const SCREENSHOT_LABEL: &str = "screenshot.txt";

/// How the renderer arranges widgets on the screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Grid,
    Flex,
    #[default]
    None,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::Grid => "grid",
            Layout::Flex => "flex",
            Layout::None => "none",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one randomly generated UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RandomUi {
    pub width: u32,
    pub height: u32,
    /// Widgets per screenshot.
    pub count: u32,
    pub layout: Layout,
    pub widget_types: Vec<String>,
}

impl RandomUi {
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.width == 0 || self.height == 0 {
            return Err(DatasetError::config(format!(
                "screenshot size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.count == 0 {
            return Err(DatasetError::config("widget count must be positive"));
        }
        validate_widget_types(&self.widget_types)
    }
}

/// Check that at least one widget type is given and all are known.
pub fn validate_widget_types(types: &[String]) -> Result<(), DatasetError> {
    if types.is_empty() {
        return Err(DatasetError::config("at least one widget type is required"));
    }

    let widgets = ClassTable::widgets();
    let unknown: Vec<&str> = types
        .iter()
        .map(String::as_str)
        .filter(|t| widgets.index_of(t).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(DatasetError::config(format!(
            "unknown widget type(s): {}; expected one of: {}",
            unknown.join(", "),
            widgets.names().join(", ")
        )));
    }
    Ok(())
}

/// What the renderer is asked to draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Random(RandomUi),
    /// Render a stored UI design file.
    Design(PathBuf),
}

/// Invocation settings for the renderer.
#[derive(Clone, Debug)]
pub struct Renderer {
    binary: PathBuf,
    script: PathBuf,
    working_dir: PathBuf,
    normalize: bool,
    capture_output: bool,
}

impl Renderer {
    /// Both `binary` and `script` must be existing files.
    pub fn new(
        binary: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, DatasetError> {
        // The renderer runs in `working_dir`, so relative paths are resolved first.
        let binary = std::path::absolute(binary.into())?;
        let script = std::path::absolute(script.into())?;
        for (what, path) in [("renderer binary", &binary), ("renderer script", &script)] {
            if !path.is_file() {
                return Err(DatasetError::config(format!(
                    "{what} '{}' is not a file",
                    path.display()
                )));
            }
        }

        Ok(Self {
            binary,
            script,
            working_dir: working_dir.into(),
            normalize: false,
            capture_output: false,
        })
    }

    /// Ask the renderer to emit normalized boxes itself.
    pub fn normalize(mut self, yes: bool) -> Self {
        self.normalize = yes;
        self
    }

    /// Collect the renderer's stdout/stderr instead of passing them through.
    pub fn capture_output(mut self, yes: bool) -> Self {
        self.capture_output = yes;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The command line for one invocation.
    pub fn command(&self, mode: &RenderMode) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(&self.script).current_dir(&self.working_dir);

        match mode {
            RenderMode::Random(ui) => {
                cmd.args(["-m", "random"])
                    .arg("-W")
                    .arg(ui.width.to_string())
                    .arg("-H")
                    .arg(ui.height.to_string())
                    .arg("-c")
                    .arg(ui.count.to_string())
                    .args(["-l", ui.layout.as_str()]);
                if self.normalize {
                    cmd.arg("--normalize");
                }
                cmd.arg("-t").args(&ui.widget_types);
            }
            RenderMode::Design(file) => {
                cmd.args(["-m", "design"]).arg("-f").arg(file);
                if self.normalize {
                    cmd.arg("--normalize");
                }
            }
        }

        cmd.args(["-o", SCREENSHOT_IMAGE]);
        cmd
    }

    /// Run the renderer once and move its output to `<output_folder>/<stem>.{jpg,txt}`.
    ///
    /// A previous capture with the same stem is replaced.
    pub fn capture(
        &self,
        mode: &RenderMode,
        output_folder: &Path,
        stem: &str,
    ) -> Result<FilePair, DatasetError> {
        let mut cmd = self.command(mode);
        let described = describe(&cmd);
        debug!("Running {described}");

        let result = if self.capture_output {
            cmd.output()
        } else {
            cmd.stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map(|status| Output {
                    status,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
        };
        let output = result.map_err(|source| DatasetError::FileIo {
            path: self.binary.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(DatasetError::ExternalProcess {
                command: described,
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let pair = FilePair::new(
            output_folder.join(format!("{stem}.jpg")),
            output_folder.join(format!("{stem}.txt")),
        );
        let image = self.working_dir.join(SCREENSHOT_IMAGE);
        let label = self.working_dir.join(SCREENSHOT_LABEL);
        // Neither file moves unless the renderer wrote both.
        for produced in [&image, &label] {
            if !produced.is_file() {
                return Err(DatasetError::config(format!(
                    "renderer exited successfully but did not write {}",
                    produced.display()
                )));
            }
        }
        take_screenshot_file(&image, &pair.image)?;
        take_screenshot_file(&label, &pair.label)?;
        Ok(pair)
    }
}

fn take_screenshot_file(from: &Path, to: &Path) -> Result<(), DatasetError> {
    if to.is_file() {
        fs::remove_file(to).map_err(DatasetError::at(to))?;
    }
    move_file(from, to)
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Settings for a capture loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Pause between renderer invocations.
    pub delay: Duration,
    /// Log and count a failing invocation instead of aborting the loop.
    pub continue_on_error: bool,
}

/// A renderer invocation that failed under `continue_on_error`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureFailure {
    /// The stem or design file the invocation was for.
    pub item: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub pairs: Vec<FilePair>,
    pub failures: Vec<CaptureFailure>,
}

/// Render `iterations` random UIs into `output_folder` as `ui_<i>.{jpg,txt}`.
pub fn capture_random(
    renderer: &Renderer,
    ui: &RandomUi,
    iterations: usize,
    output_folder: &Path,
    opts: &CaptureOptions,
) -> Result<CaptureSummary, DatasetError> {
    ui.validate()?;
    if iterations == 0 {
        return Err(DatasetError::config("iterations must be positive"));
    }
    fs::create_dir_all(output_folder).map_err(DatasetError::at(output_folder))?;

    info!(
        "Capturing {} random UI(s) of {}x{} with {} widget(s) each",
        iterations, ui.width, ui.height, ui.count
    );
    let mode = RenderMode::Random(ui.clone());
    let items = (0..iterations).map(|i| (format!("ui_{i}"), mode.clone()));
    run_loop(renderer, items, output_folder, opts)
}

/// Render every file in `design_folder` as `design_<file name>.{jpg,txt}`,
/// in file name order.
pub fn capture_designs(
    renderer: &Renderer,
    design_folder: &Path,
    output_folder: &Path,
    opts: &CaptureOptions,
) -> Result<CaptureSummary, DatasetError> {
    if !design_folder.is_dir() {
        return Err(DatasetError::config(format!(
            "design folder '{}' does not exist",
            design_folder.display()
        )));
    }

    let design_folder = std::path::absolute(design_folder)?;
    let design_folder = design_folder.as_path();
    let mut designs = Vec::new();
    for entry in fs::read_dir(design_folder).map_err(DatasetError::at(design_folder))? {
        let path = entry.map_err(DatasetError::at(design_folder))?.path();
        if path.is_file() {
            designs.push(path);
        }
    }
    if designs.is_empty() {
        return Err(DatasetError::config(format!(
            "design folder '{}' is empty",
            design_folder.display()
        )));
    }
    designs.sort();
    fs::create_dir_all(output_folder).map_err(DatasetError::at(output_folder))?;

    info!("Capturing {} design file(s)", designs.len());
    let items = designs.into_iter().map(|file| {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (format!("design_{name}"), RenderMode::Design(file))
    });
    run_loop(renderer, items, output_folder, opts)
}

fn run_loop<I>(
    renderer: &Renderer,
    items: I,
    output_folder: &Path,
    opts: &CaptureOptions,
) -> Result<CaptureSummary, DatasetError>
where
    I: IntoIterator<Item = (String, RenderMode)>,
{
    let mut summary = CaptureSummary::default();

    for (i, (stem, mode)) in items.into_iter().enumerate() {
        if i > 0 && !opts.delay.is_zero() {
            thread::sleep(opts.delay);
        }

        match renderer.capture(&mode, output_folder, &stem) {
            Ok(pair) => {
                debug!("Captured {}", pair.image.display());
                summary.pairs.push(pair);
            }
            Err(err) if opts.continue_on_error => {
                warn!("Capture of {stem} failed: {err}");
                summary.failures.push(CaptureFailure {
                    item: stem,
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        "Captured {} pair(s), {} failure(s)",
        summary.pairs.len(),
        summary.failures.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn ui(types: &[&str]) -> RandomUi {
        RandomUi {
            width: 250,
            height: 200,
            count: 3,
            layout: Layout::Grid,
            widget_types: types.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn renderer_in(dir: &Path, script_body: &str) -> Renderer {
        let script = dir.join("render.sh");
        fs::write(&script, script_body).expect("write script");
        let work = dir.join("work");
        fs::create_dir_all(&work).expect("create work dir");
        Renderer::new("/bin/sh", script, work).expect("renderer")
    }

    const FAKE_RENDERER: &str = "printf 'jpeg' > screenshot.jpg\nprintf 'button 10 10 5 5\\n' > screenshot.txt\n";

    #[test]
    fn rejects_invalid_random_parameters() {
        assert!(ui(&["button"]).validate().is_ok());
        assert!(ui(&[]).validate().is_err());
        assert!(ui(&["button", "knob"]).validate().is_err());
        let mut zero = ui(&["button"]);
        zero.width = 0;
        assert!(matches!(
            zero.validate(),
            Err(DatasetError::Configuration { .. })
        ));
    }

    #[test]
    fn renderer_requires_existing_files() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let err = Renderer::new(
            temp.path().join("micropython"),
            temp.path().join("main.py"),
            temp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::Configuration { .. }));
    }

    #[test]
    fn builds_random_and_design_command_lines() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), "").normalize(true);

        let random = renderer.command(&RenderMode::Random(ui(&["button", "label"])));
        assert_eq!(random.get_program(), OsStr::new("/bin/sh"));
        let random_args = args(&random);
        assert_eq!(
            &random_args[1..],
            [
                "-m", "random", "-W", "250", "-H", "200", "-c", "3", "-l", "grid",
                "--normalize", "-t", "button", "label", "-o", "screenshot.jpg"
            ]
        );

        let design = renderer
            .normalize(false)
            .command(&RenderMode::Design(PathBuf::from("designs/a.json")));
        assert_eq!(
            &args(&design)[1..],
            ["-m", "design", "-f", "designs/a.json", "-o", "screenshot.jpg"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn fake_renderer_produces_numbered_pairs() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), FAKE_RENDERER);
        let out = temp.path().join("captures");

        let summary = capture_random(&renderer, &ui(&["button"]), 2, &out, &CaptureOptions::default())
            .expect("capture");

        assert_eq!(summary.pairs.len(), 2);
        assert_eq!(summary.pairs[1], FilePair::new(out.join("ui_1.jpg"), out.join("ui_1.txt")));
        assert_eq!(
            fs::read_to_string(out.join("ui_0.txt")).unwrap(),
            "button 10 10 5 5\n"
        );
        assert!(!temp.path().join("work/screenshot.jpg").exists());
    }

    #[cfg(unix)]
    #[test]
    fn designs_are_captured_in_name_order() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), FAKE_RENDERER);
        let designs = temp.path().join("designs");
        fs::create_dir_all(&designs).unwrap();
        fs::write(designs.join("b.json"), "{}").unwrap();
        fs::write(designs.join("a.json"), "{}").unwrap();
        let out = temp.path().join("captures");

        let summary =
            capture_designs(&renderer, &designs, &out, &CaptureOptions::default()).expect("capture");

        let images: Vec<_> = summary.pairs.iter().map(|p| p.image.clone()).collect();
        assert_eq!(
            images,
            vec![out.join("design_a.json.jpg"), out.join("design_b.json.jpg")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn renderer_without_label_leaves_no_half_pair() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), "printf 'jpeg' > screenshot.jpg\n");
        let out = temp.path().join("captures");

        let err = capture_random(&renderer, &ui(&["button"]), 1, &out, &CaptureOptions::default())
            .unwrap_err();

        assert!(matches!(err, DatasetError::Configuration { .. }));
        assert!(!out.join("ui_0.jpg").exists());
        assert!(temp.path().join("work/screenshot.jpg").is_file());
    }

    #[test]
    fn empty_design_folder_is_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), FAKE_RENDERER);
        let designs = temp.path().join("designs");
        fs::create_dir_all(&designs).unwrap();

        let err = capture_designs(&renderer, &designs, temp.path(), &CaptureOptions::default())
            .unwrap_err();
        assert!(matches!(err, DatasetError::Configuration { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failing_renderer_is_an_external_process_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer =
            renderer_in(temp.path(), "echo 'display init failed' >&2\nexit 3\n").capture_output(true);

        let err = capture_random(
            &renderer,
            &ui(&["button"]),
            1,
            &temp.path().join("captures"),
            &CaptureOptions::default(),
        )
        .unwrap_err();

        match err {
            DatasetError::ExternalProcess { command, stderr, .. } => {
                assert!(command.contains("-m random"));
                assert!(stderr.contains("display init failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn continue_on_error_counts_failures() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let renderer = renderer_in(temp.path(), "exit 1\n");
        let opts = CaptureOptions {
            continue_on_error: true,
            ..Default::default()
        };

        let summary = capture_random(&renderer, &ui(&["button"]), 3, &temp.path().join("c"), &opts)
            .expect("loop keeps going");

        assert!(summary.pairs.is_empty());
        assert_eq!(summary.failures.len(), 3);
        assert_eq!(summary.failures[0].item, "ui_0");
    }
}
