use crate::options::ServeOptions;
use crate::process::{FilterContext, ServeCli};

use super::{plain, platform_open_url};

const DEFAULT_PROJECT: &str = "app";
const READY_MARKERS: [&str; 2] = ["Development Server is listening", "Compiled successfully"];

/// `ng run <project>:serve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AngularServeCli;

impl AngularServeCli {
    /// Flags understood by the Angular dev server itself.
    fn serve_flags(&self, options: &ServeOptions) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            options.host.clone(),
            "--port".to_string(),
            options.port.to_string(),
        ];
        if options.https {
            args.push("--ssl".to_string());
        }
        if !options.livereload {
            args.push("--live-reload=false".to_string());
        }
        args.extend(options.separated_args.iter().cloned());
        args
    }

    fn filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        let line = plain(line);
        if READY_MARKERS.iter().any(|marker| line.contains(marker)) {
            cx.ready.fire();
        }
        true
    }
}

impl ServeCli for AngularServeCli {
    fn name(&self) -> &str {
        "Angular CLI"
    }

    fn pkg(&self) -> &str {
        "@angular/cli"
    }

    fn program(&self) -> &str {
        "ng"
    }

    fn prefix(&self) -> &str {
        "ng"
    }

    fn script(&self) -> Option<&str> {
        Some("devserve:serve")
    }

    fn build_args(&self, options: &ServeOptions) -> Vec<String> {
        let project = options.project.as_deref().unwrap_or(DEFAULT_PROJECT);
        let target = match options.configuration.as_deref() {
            Some(configuration) => format!("{}:serve:{}", project, configuration),
            None => format!("{}:serve", project),
        };
        let mut args = vec!["run".to_string(), target];
        args.extend(self.serve_flags(options));
        args
    }

    fn build_script_args(&self, options: &ServeOptions) -> Vec<String> {
        self.serve_flags(options)
    }

    fn stdout_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        if cx.via_script {
            cx.ready.fire();
            return true;
        }
        self.filter(line, cx)
    }

    fn stderr_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        if cx.via_script {
            return true;
        }
        self.filter(line, cx)
    }

    fn modify_open_url(&self, url: &str, options: &ServeOptions) -> String {
        platform_open_url(url, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ReadySignal;

    #[test]
    fn args_target_project_and_configuration() {
        let options = ServeOptions {
            port: 8101,
            project: Some("web".into()),
            configuration: Some("production".into()),
            https: true,
            livereload: false,
            separated_args: vec!["--aot".into()],
            ..ServeOptions::default()
        };
        assert_eq!(
            AngularServeCli.build_args(&options),
            vec![
                "run",
                "web:serve:production",
                "--host",
                "localhost",
                "--port",
                "8101",
                "--ssl",
                "--live-reload=false",
                "--aot",
            ]
        );
    }

    #[test]
    fn script_args_omit_the_run_target() {
        let args = AngularServeCli.build_script_args(&ServeOptions::default());
        assert_eq!(args, vec!["--host", "localhost", "--port", "8100"]);
        assert_eq!(AngularServeCli.build_args(&ServeOptions::default())[1], "app:serve");
    }

    #[test]
    fn ready_only_on_marker_when_run_directly() {
        let signal = ReadySignal::default();
        let cx = FilterContext {
            ready: &signal,
            via_script: false,
        };
        assert!(AngularServeCli.stdout_filter("- Generating browser application bundles", &cx));
        assert!(!signal.is_ready());
        assert!(AngularServeCli.stderr_filter("\u{1b}[32m✔ Compiled successfully.\u{1b}[0m", &cx));
        assert!(signal.is_ready());
    }

    #[test]
    fn script_output_is_ready_on_first_line() {
        let signal = ReadySignal::default();
        let cx = FilterContext {
            ready: &signal,
            via_script: true,
        };
        AngularServeCli.stdout_filter("> ng serve", &cx);
        assert!(signal.is_ready());
    }
}
