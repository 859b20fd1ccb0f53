use log::{debug, info};
use mongodb::{
    bson::Document,
    error::ErrorKind,
    options::{
        ClientOptions, CreateCollectionOptions, TimeseriesGranularity, TimeseriesOptions, Tls,
        TlsOptions,
    },
    Client, Collection, Database,
};

use crate::config::MongoConfig;
use crate::error::Result;
use crate::storage::CollectionMode;

/// Connection to one database. Acquired once per run and released by drop on
/// every exit path.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(cfg: &MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&cfg.url).await?;
        if cfg.tls {
            let tls = TlsOptions::builder()
                .allow_invalid_certificates(cfg.tls_allow_invalid_certificates)
                .build();
            options.tls = Some(Tls::Enabled(tls));
        }

        let client = Client::with_options(options)?;
        Ok(Self {
            db: client.database(&cfg.database),
        })
    }

    /// Get-or-create by name. Calling this twice with the same name yields a
    /// handle to the same collection; a concurrent creator losing the race is
    /// resolved in favour of the existing collection rather than an error.
    pub async fn get_or_create(
        &self,
        name: &str,
        mode: CollectionMode,
    ) -> Result<Collection<Document>> {
        let existing = self.db.list_collection_names(None).await?;
        if !existing.iter().any(|candidate| candidate == name) {
            let options = match mode {
                CollectionMode::General => None,
                CollectionMode::Timeseries => Some(
                    CreateCollectionOptions::builder()
                        .timeseries(
                            TimeseriesOptions::builder()
                                .time_field("timestamp".to_string())
                                .meta_field(Some("metadata".to_string()))
                                .granularity(Some(TimeseriesGranularity::Hours))
                                .build(),
                        )
                        .build(),
                ),
            };

            match self.db.create_collection(name, options).await {
                Ok(()) => info!("created {mode} collection `{name}`"),
                Err(err) if is_namespace_exists(&err) => {
                    debug!("collection `{name}` already created by another writer");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(self.db.collection::<Document>(name))
    }
}

/// Insert each document not already present, preserving input order. Returns
/// how many were actually written, so a re-run over an overlapping range
/// reports zero.
pub async fn insert_if_absent(
    collection: &Collection<Document>,
    documents: &[Document],
) -> Result<usize> {
    let mut inserted = 0;
    for document in documents {
        if collection.find_one(document.clone(), None).await?.is_none() {
            collection.insert_one(document.clone(), None).await?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Server code 48: NamespaceExists.
fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == 48)
}
