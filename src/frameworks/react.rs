use std::collections::HashMap;

use crate::network::DEFAULT_ADDRESS;
use crate::options::ServeOptions;
use crate::process::{FilterContext, ServeCli};

use super::{plain, platform_open_url};

const READY_MARKERS: [&str; 3] = ["Compiled successfully", "Compiled with", "Failed to compile"];

/// Hints that only make sense when running react-scripts by hand.
const SUPPRESSED: [&str; 3] = [
    "Note that the development build is not optimized",
    "To create a production build, use",
    "npm run build",
];

/// `react-scripts start`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReactServeCli;

impl ServeCli for ReactServeCli {
    fn name(&self) -> &str {
        "React Scripts"
    }

    fn pkg(&self) -> &str {
        "react-scripts"
    }

    fn program(&self) -> &str {
        "react-scripts"
    }

    fn prefix(&self) -> &str {
        "react-scripts"
    }

    fn script(&self) -> Option<&str> {
        Some("devserve:serve")
    }

    fn build_args(&self, options: &ServeOptions) -> Vec<String> {
        let mut args = vec!["start".to_string()];
        args.extend(options.separated_args.iter().cloned());
        args
    }

    fn build_script_args(&self, options: &ServeOptions) -> Vec<String> {
        options.separated_args.clone()
    }

    fn build_env_vars(&self, options: &ServeOptions) -> HashMap<String, String> {
        let mut env = HashMap::from([
            ("BROWSER".to_string(), "none".to_string()),
            ("PORT".to_string(), options.port.to_string()),
            ("HTTPS".to_string(), options.https.to_string()),
        ]);
        // react-scripts warns about HOST whenever it is set.
        if options.host != DEFAULT_ADDRESS {
            env.insert("HOST".to_string(), options.host.clone());
        }
        env
    }

    fn stdout_filter(&self, line: &str, cx: &FilterContext<'_>) -> bool {
        if cx.via_script {
            cx.ready.fire();
            return true;
        }
        let line = plain(line);
        if READY_MARKERS.iter().any(|marker| line.contains(marker)) {
            cx.ready.fire();
        }
        !SUPPRESSED.iter().any(|hint| line.contains(hint))
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
    fn host_is_only_exported_when_not_default() {
        let env = ReactServeCli.build_env_vars(&ServeOptions::default());
        assert_eq!(env["BROWSER"], "none");
        assert_eq!(env["PORT"], "8100");
        assert_eq!(env["HTTPS"], "false");
        assert!(!env.contains_key("HOST"));

        let options = ServeOptions {
            host: "0.0.0.0".into(),
            ..ServeOptions::default()
        };
        assert_eq!(ReactServeCli.build_env_vars(&options)["HOST"], "0.0.0.0");
    }

    #[test]
    fn compile_banner_marks_ready_and_hints_are_dropped() {
        let signal = ReadySignal::default();
        let cx = FilterContext {
            ready: &signal,
            via_script: false,
        };
        assert!(ReactServeCli.stdout_filter("Starting the development server...", &cx));
        assert!(!signal.is_ready());
        assert!(ReactServeCli.stdout_filter("Failed to compile.", &cx));
        assert!(signal.is_ready());
        assert!(!ReactServeCli.stdout_filter("Note that the development build is not optimized.", &cx));
        assert!(!ReactServeCli.stdout_filter("To create a production build, use npm run build.", &cx));
    }
}
