use async_trait::async_trait;
use fleet_shared::{
    application::Application,
    device::{Device, RegisterDeviceBody, RenameDeviceBody},
    manifest::DeviceManifest,
};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{config::Config, error::RemoteError};

/// Calls the provisioning pipeline and commands make against the fleet
/// service. Every call may fail; none is retried.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn applications(&self) -> Result<Vec<Application>, RemoteError>;

    async fn application(&self, name: &str) -> Result<Application, RemoteError>;

    async fn devices(&self, application: Option<&str>) -> Result<Vec<Device>, RemoteError>;

    async fn device(&self, uuid: &str) -> Result<Device, RemoteError>;

    async fn register_device(&self, application: &str, uuid: &str)
    -> Result<Device, RemoteError>;

    async fn remove_device(&self, uuid: &str) -> Result<(), RemoteError>;

    async fn rename_device(&self, uuid: &str, name: &str) -> Result<(), RemoteError>;

    async fn identify_device(&self, uuid: &str) -> Result<(), RemoteError>;

    async fn reboot_device(&self, uuid: &str) -> Result<(), RemoteError>;

    async fn manifest(&self, device_type: &str) -> Result<DeviceManifest, RemoteError>;

    /// Stream the OS image for `device_type` into `output`, returning the byte count.
    async fn download_image(&self, device_type: &str, output: &Path) -> Result<u64, RemoteError>;
}

pub struct HttpFleetApi {
    api_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpFleetApi {
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        Ok(Self {
            api_url: config.api_url().to_string(),
            token: config.token.clone(),
            client: get_client(config.trust_invalid_server_cert).map_err(|source| {
                RemoteError::Http {
                    url: config.api_url().to_string(),
                    source,
                }
            })?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(
        &self,
        url: &str,
        req: RequestBuilder,
        resource: &str,
    ) -> Result<Response, RemoteError> {
        debug!("{}", url);
        let res = self
            .authorized(req)
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(resource.to_string()));
        }
        if status.is_client_error() || status.is_server_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(res)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
    ) -> Result<T, RemoteError> {
        let url = self.url(path);
        let res = self.send(&url, self.client.get(&url), resource).await?;
        res.json()
            .await
            .map_err(|source| RemoteError::Http { url, source })
    }

    async fn post_empty(&self, path: &str, resource: &str) -> Result<(), RemoteError> {
        let url = self.url(path);
        self.send(&url, self.client.post(&url), resource).await?;
        Ok(())
    }
}

#[async_trait]
impl FleetApi for HttpFleetApi {
    async fn applications(&self) -> Result<Vec<Application>, RemoteError> {
        self.get_json("application", "applications").await
    }

    async fn application(&self, name: &str) -> Result<Application, RemoteError> {
        self.get_json(
            &format!("application/{}", name),
            &format!("application {}", name),
        )
        .await
    }

    async fn devices(&self, application: Option<&str>) -> Result<Vec<Device>, RemoteError> {
        match application {
            Some(app) => {
                self.get_json(
                    &format!("application/{}/device", app),
                    &format!("application {}", app),
                )
                .await
            }
            None => self.get_json("device", "devices").await,
        }
    }

    async fn device(&self, uuid: &str) -> Result<Device, RemoteError> {
        self.get_json(&format!("device/{}", uuid), &format!("device {}", uuid))
            .await
    }

    async fn register_device(
        &self,
        application: &str,
        uuid: &str,
    ) -> Result<Device, RemoteError> {
        let url = self.url("device");
        let body = RegisterDeviceBody {
            application: application.to_string(),
            uuid: uuid.to_string(),
        };
        let res = self
            .send(
                &url,
                self.client.post(&url).json(&body),
                &format!("application {}", application),
            )
            .await?;
        res.json()
            .await
            .map_err(|source| RemoteError::Http { url, source })
    }

    async fn remove_device(&self, uuid: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("device/{}", uuid));
        self.send(&url, self.client.delete(&url), &format!("device {}", uuid))
            .await?;
        Ok(())
    }

    async fn rename_device(&self, uuid: &str, name: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("device/{}", uuid));
        let body = RenameDeviceBody {
            name: name.to_string(),
        };
        self.send(
            &url,
            self.client.patch(&url).json(&body),
            &format!("device {}", uuid),
        )
        .await?;
        Ok(())
    }

    async fn identify_device(&self, uuid: &str) -> Result<(), RemoteError> {
        self.post_empty(
            &format!("device/{}/identify", uuid),
            &format!("device {}", uuid),
        )
        .await
    }

    async fn reboot_device(&self, uuid: &str) -> Result<(), RemoteError> {
        self.post_empty(
            &format!("device/{}/reboot", uuid),
            &format!("device {}", uuid),
        )
        .await
    }

    async fn manifest(&self, device_type: &str) -> Result<DeviceManifest, RemoteError> {
        self.get_json(
            &format!("device-type/{}/manifest", device_type),
            &format!("device type {}", device_type),
        )
        .await
    }

    async fn download_image(&self, device_type: &str, output: &Path) -> Result<u64, RemoteError> {
        let url = self.url(&format!("os/{}/image", device_type));
        let res = self
            .send(
                &url,
                self.client.get(&url),
                &format!("image for {}", device_type),
            )
            .await?;

        let write_err = |source| RemoteError::Download {
            path: output.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(output).await.map_err(write_err)?;
        let mut stream = res.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| RemoteError::Http {
                url: url.clone(),
                source,
            })?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        Ok(written)
    }
}

fn get_client(trust_invalid_server_cert: bool) -> reqwest::Result<Client> {
    if trust_invalid_server_cert {
        warn!("Trusting invalid server certificate");
        reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
    } else {
        Ok(Client::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = Config {
            api_url: "https://fleet.local/v1/".into(),
            ..Config::default()
        };
        let api = HttpFleetApi::new(&config).unwrap();
        assert_eq!(api.url("/device/abc"), "https://fleet.local/v1/device/abc");
        assert_eq!(api.url("application"), "https://fleet.local/v1/application");
    }
}
