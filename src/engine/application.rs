// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application provisioning.
//!
//! Applications, their client versions and master key pairs are created by
//! operators ahead of any pairing. None of this is exposed over HTTP; the
//! server ensures its configured application at startup.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::EngineContext;
use crate::config::ApplicationBootstrap;
use crate::encoding;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{
    ApplicationRepository, StoredApplication, StoredApplicationVersion, StoredMasterKeyPair,
};

const APPLICATION_CREDENTIAL_LEN: usize = 16;

/// An application with its current master public key and all versions.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationDetail {
    pub application_id: u64,
    pub name: String,
    pub master_public_key: String,
    pub versions: Vec<StoredApplicationVersion>,
}

#[derive(Clone)]
pub struct ApplicationEngine {
    ctx: Arc<EngineContext>,
}

impl ApplicationEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Create the configured application, its master key pair and version
    /// unless they already exist. Existing rows are never rewritten.
    pub fn ensure_application(&self, bootstrap: &ApplicationBootstrap) -> ServiceResult<ApplicationDetail> {
        let uow = self.ctx.store.write()?;
        let applications = ApplicationRepository::new(&uow);

        let existing = applications
            .list()?
            .into_iter()
            .find(|a| a.name == bootstrap.name);
        let application = match existing {
            Some(application) => application,
            None => {
                let application = applications.create(&bootstrap.name)?;
                tracing::info!(application_id = application.id, name = %application.name, "Application created");
                application
            }
        };

        if applications.current_master_key_pair(application.id)?.is_none() {
            applications.add_master_key_pair(&self.new_master_key_pair(&application)?)?;
            tracing::info!(application_id = application.id, "Master key pair created");
        }

        let versions = applications.list_versions(application.id)?;
        match versions.iter().find(|v| v.name == bootstrap.version) {
            Some(version) => {
                if bootstrap
                    .credentials
                    .as_ref()
                    .is_some_and(|c| c.application_key != version.application_key)
                {
                    tracing::warn!(
                        application_id = application.id,
                        version = %version.name,
                        "Configured application key differs from the stored version; keeping the stored one"
                    );
                }
            }
            None => {
                let mut version = self.new_version(application.id, &bootstrap.version)?;
                if let Some(credentials) = &bootstrap.credentials {
                    if applications.get_version(&credentials.application_key)?.is_some() {
                        return Err(ServiceError::InvalidInputFormat(
                            "application key already belongs to another version".to_string(),
                        ));
                    }
                    version.application_key = credentials.application_key.clone();
                    version.application_secret = credentials.application_secret.clone();
                }
                applications.put_version(&version)?;
                tracing::info!(
                    application_id = application.id,
                    version = %version.name,
                    application_key = %version.application_key,
                    "Application version created"
                );
            }
        }
        uow.commit()?;

        self.detail(application.id)
    }

    pub fn list(&self) -> ServiceResult<Vec<StoredApplication>> {
        let uow = self.ctx.store.read()?;
        Ok(ApplicationRepository::new(&uow).list()?)
    }

    pub fn detail(&self, application_id: u64) -> ServiceResult<ApplicationDetail> {
        let uow = self.ctx.store.read()?;
        let applications = ApplicationRepository::new(&uow);
        let application = applications
            .get(application_id)?
            .ok_or(ServiceError::ApplicationNotFound)?;
        let master = applications
            .current_master_key_pair(application_id)?
            .ok_or(ServiceError::NoMasterServerKeyPair)?;
        Ok(ApplicationDetail {
            application_id,
            name: application.name,
            master_public_key: master.public_key,
            versions: applications.list_versions(application_id)?,
        })
    }

    pub fn create_version(
        &self,
        application_id: u64,
        name: &str,
    ) -> ServiceResult<StoredApplicationVersion> {
        let uow = self.ctx.store.write()?;
        let applications = ApplicationRepository::new(&uow);
        applications
            .get(application_id)?
            .ok_or(ServiceError::ApplicationNotFound)?;
        let version = self.new_version(application_id, name)?;
        applications.put_version(&version)?;
        uow.commit()?;

        tracing::info!(application_id, version = name, "Application version created");
        Ok(version)
    }

    /// Unsupported versions can no longer pair devices or sign requests.
    pub fn set_version_supported(
        &self,
        application_key: &str,
        supported: bool,
    ) -> ServiceResult<StoredApplicationVersion> {
        let uow = self.ctx.store.write()?;
        let applications = ApplicationRepository::new(&uow);
        let mut version = applications
            .get_version(application_key)?
            .ok_or(ServiceError::ApplicationNotFound)?;
        version.supported = supported;
        applications.put_version(&version)?;
        uow.commit()?;

        tracing::info!(
            application_id = version.application_id,
            version = %version.name,
            supported,
            "Application version support changed"
        );
        Ok(version)
    }

    /// Add a new master key pair; it becomes current for new pairings.
    pub fn rotate_master_key_pair(&self, application_id: u64) -> ServiceResult<StoredMasterKeyPair> {
        let uow = self.ctx.store.write()?;
        let applications = ApplicationRepository::new(&uow);
        let application = applications
            .get(application_id)?
            .ok_or(ServiceError::ApplicationNotFound)?;

        let mut key_pair = self.new_master_key_pair(&application)?;
        // Keep the newest-first order even within one millisecond.
        if let Some(current) = applications.current_master_key_pair(application_id)? {
            let floor = current.created_at + TimeDelta::milliseconds(1);
            key_pair.created_at = key_pair.created_at.max(floor);
        }
        applications.add_master_key_pair(&key_pair)?;
        uow.commit()?;

        tracing::info!(application_id, key_pair_id = %key_pair.id, "Master key pair rotated");
        Ok(key_pair)
    }

    fn new_master_key_pair(&self, application: &StoredApplication) -> ServiceResult<StoredMasterKeyPair> {
        let key_pair = self.ctx.crypto().generate_key_pair()?;
        Ok(StoredMasterKeyPair {
            id: Uuid::new_v4().to_string(),
            application_id: application.id,
            name: format!("{} master key", application.name),
            private_key: encoding::encode(&key_pair.private_key),
            public_key: encoding::encode(&key_pair.public_key),
            created_at: Utc::now(),
        })
    }

    fn new_version(&self, application_id: u64, name: &str) -> ServiceResult<StoredApplicationVersion> {
        let crypto = self.ctx.crypto();
        Ok(StoredApplicationVersion {
            application_id,
            name: name.to_string(),
            application_key: encoding::encode(&crypto.random_bytes(APPLICATION_CREDENTIAL_LEN)?),
            application_secret: encoding::encode(&crypto.random_bytes(APPLICATION_CREDENTIAL_LEN)?),
            supported: true,
            created_at: Utc::now(),
        })
    }
}
