use crate::options::ServeOptions;
use crate::process::{FilterContext, ServeCli};

use super::{plain, platform_open_url};

const READY_MARKER: &str = "App running at";
const SUPPRESSED: &str = "Note that the development build is not optimized";

/// `vue-cli-service serve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct VueServeCli;

impl VueServeCli {
    fn serve_flags(&self, options: &ServeOptions) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            options.host.clone(),
            "--port".to_string(),
            options.port.to_string(),
        ];
        if options.https {
            args.push("--https".to_string());
        }
        args.extend(options.separated_args.iter().cloned());
        args
    }
}

impl ServeCli for VueServeCli {
    fn name(&self) -> &str {
        "Vue CLI Service"
    }

    fn pkg(&self) -> &str {
        "@vue/cli-service"
    }

    fn program(&self) -> &str {
        "vue-cli-service"
    }

    fn prefix(&self) -> &str {
        "vue-cli-service"
    }

    fn script(&self) -> Option<&str> {
        Some("devserve:serve")
    }

    fn build_args(&self, options: &ServeOptions) -> Vec<String> {
        let mut args = vec!["serve".to_string()];
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
        let line = plain(line);
        if line.contains(READY_MARKER) {
            cx.ready.fire();
        }
        !line.contains(SUPPRESSED)
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
    fn args_include_https_when_requested() {
        let options = ServeOptions {
            host: "0.0.0.0".into(),
            https: true,
            ..ServeOptions::default()
        };
        assert_eq!(
            VueServeCli.build_args(&options),
            vec!["serve", "--host", "0.0.0.0", "--port", "8100", "--https"]
        );
    }

    #[test]
    fn ready_on_app_running_banner() {
        let signal = ReadySignal::default();
        let cx = FilterContext {
            ready: &signal,
            via_script: false,
        };
        assert!(VueServeCli.stdout_filter(" DONE  Compiled successfully in 812ms", &cx));
        assert!(!signal.is_ready());
        assert!(VueServeCli.stdout_filter("  App running at:", &cx));
        assert!(signal.is_ready());
        assert!(!VueServeCli.stdout_filter("  Note that the development build is not optimized.", &cx));
    }
}
