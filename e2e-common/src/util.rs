//! Helpers for logging external commands.

use std::borrow::Cow;

/// Variable names whose values never appear in logs.
const SENSITIVE_KEYS: &[&str] = &[
    "ACCESS_TOKEN",
    "AUTH_TOKEN",
    "API_KEY",
    "CLIENT_SECRET",
    "PASSWORD",
    "PRIVATE_KEY",
    "SECRET",
    "TOKEN",
];

/// Render a command line the way a user would type it into a shell.
pub fn render_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut rendered = shell_escape::escape(Cow::Borrowed(program)).into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&shell_escape::escape(Cow::Borrowed(arg.as_ref())));
    }
    rendered
}

fn is_sensitive_key(key: &str) -> bool {
    let upper = key.trim_start_matches('-').to_ascii_uppercase().replace('-', "_");
    SENSITIVE_KEYS
        .iter()
        .any(|needle| upper == *needle || upper.ends_with(&format!("_{needle}")))
}

/// Mask values of sensitive `KEY=value` pairs in a rendered command.
///
/// Covers environment assignments (`GITHUB_TOKEN=...`), Terraform variables
/// (`-var db_password=...`) and `--flag=value` forms.
pub fn mask_sensitive_command(cmd: &str) -> String {
    cmd.split(' ')
        .map(|word| {
            let Some((key, _value)) = word.split_once('=') else {
                return word.to_string();
            };
            let key_trimmed = key.trim_start_matches(['\'', '"']);
            if is_sensitive_key(key_trimmed) {
                format!("{key}=***")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_guard;

    #[test]
    fn test_render_command_quotes_arguments() {
        let _guard = test_guard!();
        let rendered = render_command("terraform", &["apply", "-var", "image=gcr.io/p/img:v1 beta"]);
        assert_eq!(rendered, "terraform apply -var 'image=gcr.io/p/img:v1 beta'");
    }

    #[test]
    fn test_render_command_plain() {
        let _guard = test_guard!();
        let args: Vec<String> = vec!["rm".into(), "--force".into(), "e2e-abc".into()];
        assert_eq!(render_command("docker", &args), "docker rm --force e2e-abc");
    }

    #[test]
    fn test_mask_sensitive_command() {
        let _guard = test_guard!();
        let cmd = "terraform apply -var project_id=my-proj -var db_password=hunter2 GITHUB_TOKEN=abcdef --token=mytoken";
        let masked = mask_sensitive_command(cmd);

        assert!(masked.contains("project_id=my-proj"));
        assert!(masked.contains("db_password=***"));
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains("GITHUB_TOKEN=***"));
        assert!(!masked.contains("abcdef"));
        assert!(masked.contains("--token=***"));
        assert!(!masked.contains("mytoken"));
    }

    #[test]
    fn test_mask_leaves_non_sensitive_keys() {
        let _guard = test_guard!();
        let cmd = "docker run -e TOKENIZER_MODE=fast -e PORT=8000 img";
        assert_eq!(mask_sensitive_command(cmd), cmd);
    }

    #[test]
    fn test_mask_quoted_assignment() {
        let _guard = test_guard!();
        let masked = mask_sensitive_command("run 'API_KEY=abc'");
        assert_eq!(masked, "run 'API_KEY=***");
    }
}
