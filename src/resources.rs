//! Discovered service endpoints and the file/directory views over them.

use crate::error::{Error, Result};
use crate::gateway::{ResourceListing, RuntimeGateway};
use crate::transfer::{stage_bytes, upload};
use crate::types::{ServiceId, ServiceResource};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds one resource per listed `(guest, host)` pair, in listing order.
pub fn discover(listing: Vec<ResourceListing>) -> Vec<ServiceResource> {
    listing
        .into_iter()
        .map(|(guest_uri, host_uri)| ServiceResource::new(guest_uri, host_uri))
        .collect()
}

/// Binds each resource to exactly one adapter: a directory adapter when the
/// guest path ends in `/`, a file adapter otherwise. Adapters keep the order
/// of `resources`; file and directory adapters are not grouped.
pub fn adapters(
    gateway: &Arc<dyn RuntimeGateway>,
    service_id: &str,
    resources: &[ServiceResource],
) -> Vec<ResourceAdapter> {
    resources
        .iter()
        .map(|resource| {
            let binding = Binding {
                gateway: Arc::clone(gateway),
                service_id: service_id.to_string(),
                resource: resource.clone(),
            };
            if resource.is_directory() {
                ResourceAdapter::Directory(DirectoryAdapter(binding))
            } else {
                ResourceAdapter::File(FileAdapter(binding))
            }
        })
        .collect()
}

#[derive(Clone)]
struct Binding {
    gateway: Arc<dyn RuntimeGateway>,
    service_id: ServiceId,
    resource: ServiceResource,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("service_id", &self.service_id)
            .field("guest_uri", &self.resource.guest_uri.as_str())
            .field("host_uri", &self.resource.host_uri.as_str())
            .finish()
    }
}

/// A capability view over one discovered resource.
#[derive(Clone, Debug)]
pub enum ResourceAdapter {
    File(FileAdapter),
    Directory(DirectoryAdapter),
}

impl ResourceAdapter {
    pub fn resource(&self) -> &ServiceResource {
        match self {
            ResourceAdapter::File(adapter) => adapter.resource(),
            ResourceAdapter::Directory(adapter) => adapter.resource(),
        }
    }

    pub fn as_file(&self) -> Option<&FileAdapter> {
        match self {
            ResourceAdapter::File(adapter) => Some(adapter),
            ResourceAdapter::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryAdapter> {
        match self {
            ResourceAdapter::Directory(adapter) => Some(adapter),
            ResourceAdapter::File(_) => None,
        }
    }
}

/// Whole-content access to exactly one guest path.
#[derive(Clone, Debug)]
pub struct FileAdapter(Binding);

impl FileAdapter {
    pub fn resource(&self) -> &ServiceResource {
        &self.0.resource
    }

    pub fn path(&self) -> &str {
        self.0.resource.guest_uri.path()
    }

    pub async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.0
            .gateway
            .read_file(&self.0.service_id, self.path(), cancel)
            .await
    }

    pub async fn write(&self, contents: &[u8], cancel: &CancellationToken) -> Result<()> {
        let staged = stage_bytes(contents)?;
        upload(
            self.0.gateway.as_ref(),
            &self.0.service_id,
            staged,
            self.path(),
            None,
            None,
            cancel,
        )
        .await
    }

    pub async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        self.0
            .gateway
            .remove_file(&self.0.service_id, self.path(), cancel)
            .await
    }
}

/// Access to files by relative path under a guest directory.
#[derive(Clone, Debug)]
pub struct DirectoryAdapter(Binding);

impl DirectoryAdapter {
    pub fn resource(&self) -> &ServiceResource {
        &self.0.resource
    }

    pub fn root(&self) -> &str {
        self.0.resource.guest_uri.path()
    }

    /// Resolves `relative` under the root, refusing empty paths and `..` components.
    pub fn resolve(&self, relative: &str) -> Result<String> {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return Err(Error::InvalidArgument(format!(
                "`{relative}` is not a path under {}",
                self.root()
            )));
        }
        Ok(format!("{}{relative}", self.root()))
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.0
            .gateway
            .list_directory(&self.0.service_id, self.root(), cancel)
            .await
    }

    pub async fn read(&self, relative: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        self.0
            .gateway
            .read_file(&self.0.service_id, &path, cancel)
            .await
    }

    pub async fn write(
        &self,
        relative: &str,
        contents: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = self.resolve(relative)?;
        let staged = stage_bytes(contents)?;
        upload(
            self.0.gateway.as_ref(),
            &self.0.service_id,
            staged,
            &path,
            None,
            None,
            cancel,
        )
        .await
    }

    pub async fn delete(&self, relative: &str, cancel: &CancellationToken) -> Result<()> {
        let path = self.resolve(relative)?;
        self.0
            .gateway
            .remove_file(&self.0.service_id, &path, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeGateway;
    use url::Url;

    fn pair(guest: &str, host: &str) -> ResourceListing {
        (
            Url::parse(guest).expect("valid guest url"),
            Url::parse(host).expect("valid host url"),
        )
    }

    fn bind(fake: &Arc<FakeGateway>, listing: Vec<ResourceListing>) -> Vec<ResourceAdapter> {
        let gateway: Arc<dyn RuntimeGateway> = fake.clone();
        adapters(&gateway, "service-1", &discover(listing))
    }

    #[test]
    fn trailing_separator_selects_directory_adapter() {
        let fake = Arc::new(FakeGateway::new());
        let adapters = bind(
            &fake,
            vec![
                pair("file:///data/", "file:///var/lib/data/"),
                pair("file:///data/file.txt", "file:///var/lib/data/file.txt"),
            ],
        );

        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[0].as_directory().map(|dir| dir.root()), Some("/data/"));
        assert!(adapters[0].as_file().is_none());
        assert_eq!(
            adapters[1].as_file().map(|file| file.path()),
            Some("/data/file.txt")
        );
        assert!(adapters[1].as_directory().is_none());
    }

    #[test]
    fn discovery_keeps_listing_order_and_pairs() {
        let resources = discover(vec![
            pair("tcp://localhost:22", "tcp://127.0.0.1:49153"),
            pair("tcp://localhost:6379", "tcp://127.0.0.1:49154"),
        ]);

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].guest_uri.port(), Some(22));
        assert_eq!(resources[0].host_uri.port(), Some(49153));
        assert_eq!(resources[1].guest_uri.port(), Some(6379));
    }

    #[test]
    fn directory_paths_stay_under_root() {
        let fake = Arc::new(FakeGateway::new());
        let adapters = bind(&fake, vec![pair("file:///data/", "file:///srv/data/")]);
        let dir = adapters[0].as_directory().expect("directory adapter");

        assert_eq!(dir.resolve("a.txt").expect("valid"), "/data/a.txt");
        assert_eq!(dir.resolve("/nested/b.txt").expect("valid"), "/data/nested/b.txt");
        assert!(matches!(dir.resolve("../etc/passwd"), Err(Error::InvalidArgument(_))));
        assert!(matches!(dir.resolve(""), Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn file_adapter_reads_writes_and_deletes_its_path() {
        let fake = Arc::new(FakeGateway::new());
        let adapters = bind(&fake, vec![pair("file:///data/file.txt", "file:///srv/file.txt")]);
        let file = adapters[0].as_file().expect("file adapter");
        let cancel = CancellationToken::new();

        file.write(b"contents", &cancel).await.expect("write succeeds");
        assert_eq!(file.read(&cancel).await.expect("read succeeds"), b"contents");

        let staged = fake.uploads()[0].host_path.clone();
        assert!(!staged.exists());

        file.delete(&cancel).await.expect("delete succeeds");
        assert!(fake.file("service-1", "/data/file.txt").is_none());
    }

    #[tokio::test]
    async fn directory_adapter_lists_and_accesses_relative_paths() {
        let fake = Arc::new(FakeGateway::new());
        fake.seed_file("service-1", "/data/existing.txt", b"seeded");
        let adapters = bind(&fake, vec![pair("file:///data/", "file:///srv/data/")]);
        let dir = adapters[0].as_directory().expect("directory adapter");
        let cancel = CancellationToken::new();

        dir.write("nested/new.txt", b"new", &cancel)
            .await
            .expect("write succeeds");

        assert_eq!(
            dir.list(&cancel).await.expect("list succeeds"),
            vec!["existing.txt".to_string(), "nested/".to_string()]
        );
        assert_eq!(
            dir.read("existing.txt", &cancel).await.expect("read succeeds"),
            b"seeded"
        );

        dir.delete("nested/new.txt", &cancel)
            .await
            .expect("delete succeeds");
        assert!(fake.file("service-1", "/data/nested/new.txt").is_none());
    }
}
