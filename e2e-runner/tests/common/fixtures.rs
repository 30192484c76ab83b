use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const FAKE_TERRAFORM: &str = r#"#!/bin/sh
echo "tf $TF_WORKSPACE $*" >> "$FAKE_LOG"
if [ -n "$FAKE_TF_FAIL" ]; then
  case "$*" in
    *"$FAKE_TF_FAIL"*) echo "Error: injected failure in $FAKE_TF_FAIL" >&2; exit 1 ;;
  esac
fi
case "$*" in
  *"output -json"*)
    printf '{"endpoint":{"value":"%s","type":"string","sensitive":false},"request_topic":{"value":"req-%s","type":"string","sensitive":false}}\n' "$FAKE_TF_ENDPOINT" "$TF_WORKSPACE"
    ;;
esac
exit 0
"#;

const FAKE_DOCKER: &str = r#"#!/bin/sh
echo "docker $*" >> "$FAKE_LOG"
case "$1" in
  run) echo "cid0123456789" ;;
esac
exit 0
"#;

/// Fake terraform and docker executables writing to one shared call log.
pub struct FakeTools {
    pub dir: TempDir,
    pub terraform: PathBuf,
    pub docker: PathBuf,
    pub tf_root: PathBuf,
    pub config: PathBuf,
    pub log: PathBuf,
}

impl FakeTools {
    pub fn new() -> Self {
        crate::common::init();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let terraform = write_script(dir.path(), "terraform", FAKE_TERRAFORM);
        let docker = write_script(dir.path(), "docker", FAKE_DOCKER);
        let tf_root = dir.path().join("tf");
        for module in ["local", "gke", "cloud-run", "persistent"] {
            std::fs::create_dir_all(tf_root.join(module)).expect("Failed to create module dir");
        }
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[terraform]\nroot = \"{}\"\nbinary = \"{}\"\n\n[docker]\nbinary = \"{}\"\n\n[health]\npoll_interval_ms = 50\n",
                tf_root.display(),
                terraform.display(),
                docker.display()
            ),
        )
        .expect("Failed to write config");
        let log = dir.path().join("calls.log");

        Self {
            dir,
            terraform,
            docker,
            tf_root,
            config,
            log,
        }
    }

    /// `e2e-runner` preconfigured with the fake tools and a project id.
    pub fn runner(&self, endpoint: &str) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_e2e-runner"));
        cmd.env("FAKE_LOG", &self.log)
            .env("FAKE_TF_ENDPOINT", endpoint)
            .env_remove("FAKE_TF_FAIL")
            .env_remove("PROJECT_ID")
            .env_remove("TEST_RUN_ID")
            .env_remove("GOOGLE_APPLICATION_CREDENTIALS")
            .arg("--config")
            .arg(&self.config)
            .args(["--project-id", "itest-proj"]);
        cmd
    }

    /// Wrappers around the fake tools with the log, endpoint and failure
    /// baked in, for driving the library in-process.
    pub fn bound(&self, endpoint: &str, fail: Option<&str>) -> (PathBuf, PathBuf) {
        let env = format!(
            "export FAKE_LOG='{}' FAKE_TF_ENDPOINT='{}' FAKE_TF_FAIL='{}'",
            self.log.display(),
            endpoint,
            fail.unwrap_or_default()
        );
        let terraform = write_script(
            self.dir.path(),
            "terraform-bound",
            &format!("#!/bin/sh\n{env}\nexec '{}' \"$@\"\n", self.terraform.display()),
        );
        let docker = write_script(
            self.dir.path(),
            "docker-bound",
            &format!("#!/bin/sh\n{env}\nexec '{}' \"$@\"\n", self.docker.display()),
        );
        (terraform, docker)
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("Failed to write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod fake tool");
    path
}

/// Answers every HTTP request with the given status line.
pub struct HealthServer {
    pub port: u16,
}

impl HealthServer {
    pub fn start(status_line: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind health server");
        let port = listener.local_addr().expect("No local addr").port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let response =
                    format!("{status_line}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Self { port }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

pub fn describe(output: &Output) -> String {
    format!(
        "status: {:?}\nstdout: {}\nstderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}
