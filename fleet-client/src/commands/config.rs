use fleet_shared::config::ConfigDocument;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{
    commands::SELECT_DEVICE_DRIVE,
    config_blob::{ConfigBlob, GenerateTarget, generate as generate_document},
    error::ProvisionError,
    prompt::Prompter,
    server::FleetApi,
};

/// Drive selection shared by the drive-backed config commands.
#[derive(Debug, Clone)]
pub struct DriveArgs {
    pub device_type: String,
    pub drive: Option<PathBuf>,
}

pub async fn read(
    blob: &ConfigBlob<'_>,
    prompter: &dyn Prompter,
    args: DriveArgs,
) -> Result<ConfigDocument, ProvisionError> {
    let drive = blob
        .guard()
        .acquire(args.drive, prompter, SELECT_DEVICE_DRIVE)
        .await?;
    blob.read(&drive, &args.device_type).await
}

/// Set one dotted `key` to `value`. Values are stored as strings.
pub async fn write(
    blob: &ConfigBlob<'_>,
    prompter: &dyn Prompter,
    args: DriveArgs,
    key: &str,
    value: &str,
) -> Result<ConfigDocument, ProvisionError> {
    let drive = blob
        .guard()
        .acquire(args.drive, prompter, SELECT_DEVICE_DRIVE)
        .await?;
    blob.write_key(&drive, &args.device_type, key, value).await
}

pub async fn inject(
    blob: &ConfigBlob<'_>,
    prompter: &dyn Prompter,
    args: DriveArgs,
    file: &Path,
) -> Result<ConfigDocument, ProvisionError> {
    let drive = blob
        .guard()
        .acquire(args.drive, prompter, SELECT_DEVICE_DRIVE)
        .await?;
    blob.inject(&drive, &args.device_type, file).await
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub device: Option<String>,
    pub application: Option<String>,
    pub output: Option<PathBuf>,
}

/// Build a fresh `config.json` for a device or, failing that, an application.
pub async fn generate(
    api: &dyn FleetApi,
    prompter: &dyn Prompter,
    api_url: &str,
    request: &GenerateRequest,
) -> Result<ConfigDocument, ProvisionError> {
    let target = match (&request.device, &request.application) {
        (Some(uuid), _) => GenerateTarget::Device(api.device(uuid).await?),
        (None, Some(name)) => GenerateTarget::Application(api.application(name).await?),
        (None, None) => {
            return Err(ProvisionError::UserInput(
                "You have to pass either a device or an application.\n\n\
                 See the help page for examples:\n\n  $ fleet config generate --help"
                    .into(),
            ));
        }
    };

    let manifest = api.manifest(target.device_type()).await?;
    let options: Vec<_> = manifest.visible_options(true).collect();
    let answers = prompter.ask_options(&options)?;
    let document = generate_document(&manifest.options, &answers, &target, api_url);

    if let Some(output) = &request.output {
        let contents = document
            .to_json()
            .map_err(|e| ProvisionError::InvalidConfig(e.to_string()))?;
        tokio::fs::write(output, contents)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to write {}", output.display()), e))?;
        info!("Config written to {}", output.display());
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        config_blob::FilesystemCodec,
        drive::{DriveCandidate, DriveGuard},
        provision::testing::*,
    };
    use fleet_shared::manifest::ConfigOption;
    use serde_json::json;

    fn drive_args(dir: &Path) -> DriveArgs {
        DriveArgs {
            device_type: "raspberry-pi".into(),
            drive: Some(dir.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn test_read_prompts_for_drive_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"uuid":"abc"}"#).unwrap();
        let mounts = FakeMounts::default().with_drives(vec![DriveCandidate {
            path: dir.path().to_path_buf(),
            size: Some("8G".into()),
            model: None,
        }]);
        let codec = FilesystemCodec::new(&Config::default());
        let blob = ConfigBlob::new(DriveGuard::new(&mounts), &codec);

        let doc = read(
            &blob,
            &ScriptedPrompter::default(),
            DriveArgs {
                device_type: "raspberry-pi".into(),
                drive: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(doc.uuid(), Some("abc"));
    }

    #[tokio::test]
    async fn test_write_keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"uuid":"abc","files":{"network/config":"x"}}"#,
        )
        .unwrap();
        let mounts = FakeMounts::default();
        let codec = FilesystemCodec::new(&Config::default());
        let blob = ConfigBlob::new(DriveGuard::new(&mounts), &codec);
        let prompter = ScriptedPrompter::default();

        write(&blob, &prompter, drive_args(dir.path()), "files.network/settings", "...")
            .await
            .unwrap();

        let doc = read(&blob, &prompter, drive_args(dir.path())).await.unwrap();
        assert_eq!(doc.uuid(), Some("abc"));
        assert_eq!(doc.get("files.network/config"), Some(&json!("x")));
        assert_eq!(doc.get("files.network/settings"), Some(&json!("...")));
    }

    #[tokio::test]
    async fn test_inject_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"uuid":"old"}"#).unwrap();
        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), r#"{"uuid":"new","applicationName":"MyApp"}"#).unwrap();
        let mounts = FakeMounts::mounted(dir.path(), &["/media/boot"]);
        let codec = FilesystemCodec::new(&Config::default());
        let blob = ConfigBlob::new(DriveGuard::new(&mounts), &codec);
        let prompter = ScriptedPrompter::default();

        inject(&blob, &prompter, drive_args(dir.path()), source.path())
            .await
            .unwrap();

        let doc = read(&blob, &prompter, drive_args(dir.path())).await.unwrap();
        assert_eq!(doc.uuid(), Some("new"));
        assert_eq!(mounts.unmounts(), 1);
    }

    #[tokio::test]
    async fn test_inject_rejects_invalid_file_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"uuid":"old"}"#).unwrap();
        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), "not json").unwrap();
        let mounts = FakeMounts::default();
        let codec = FilesystemCodec::new(&Config::default());
        let blob = ConfigBlob::new(DriveGuard::new(&mounts), &codec);

        let err = inject(
            &blob,
            &ScriptedPrompter::default(),
            drive_args(dir.path()),
            source.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
        let untouched = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert_eq!(untouched, r#"{"uuid":"old"}"#);
    }

    #[tokio::test]
    async fn test_generate_requires_device_or_application() {
        let api = FakeApi::with_app("MyApp", "raspberry-pi");
        let err = generate(
            &api,
            &ScriptedPrompter::default(),
            "https://fleet.local",
            &GenerateRequest::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::UserInput(_)));
    }

    #[tokio::test]
    async fn test_generate_prefers_device_and_applies_answers() {
        let options: Vec<ConfigOption> = serde_json::from_value(json!([
            {"name": "network", "default": "ethernet"},
            {"name": "wifiSsid", "advanced": true}
        ]))
        .unwrap();
        let api = FakeApi::with_app("MyApp", "raspberry-pi").with_manifest_options(options);
        api.insert_device(device("abc123", "MyApp", "raspberry-pi"));
        let mut prompter = ScriptedPrompter::default();
        prompter.answers.insert("wifiSsid".into(), json!("home"));
        let output = tempfile::NamedTempFile::new().unwrap();

        let doc = generate(
            &api,
            &prompter,
            "https://fleet.local",
            &GenerateRequest {
                device: Some("abc123".into()),
                application: Some("MyApp".into()),
                output: Some(output.path().to_path_buf()),
            },
        )
        .await
        .unwrap();

        assert_eq!(doc.uuid(), Some("abc123"));
        assert!(doc.get("applicationId").is_none());
        assert_eq!(doc.get("network"), Some(&json!("ethernet")));
        assert_eq!(doc.get("wifiSsid"), Some(&json!("home")));

        let written = std::fs::read_to_string(output.path()).unwrap();
        assert_eq!(ConfigDocument::from_json(&written).unwrap(), doc);
    }

    #[tokio::test]
    async fn test_generate_for_application() {
        let api = FakeApi::with_app("MyApp", "raspberry-pi");
        let doc = generate(
            &api,
            &ScriptedPrompter::default(),
            "https://fleet.local",
            &GenerateRequest {
                application: Some("MyApp".into()),
                ..GenerateRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(doc.get("applicationName"), Some(&json!("MyApp")));
        assert!(doc.uuid().is_none());
    }
}
