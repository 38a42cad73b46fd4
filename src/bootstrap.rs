//! Idempotent account preparation.
//!
//! Before the first network can launch, every region needs the configured
//! key pair and the account needs an execution profile for remote
//! commands. Running the bootstrap again is harmless: resources that
//! already exist count as prepared.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::{ComputeError, Region, RemoteCompute};
use crate::config::FleetConfig;
use crate::settle::settle;

/// Whether a bootstrap step created a resource or found it in place.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preparation {
    /// The resource was created by this run.
    Created,
    /// The resource already existed.
    AlreadyPresent,
}

/// What a bootstrap run prepared.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapSummary {
    /// Key pair outcome per region, in provider order.
    pub key_pairs: Vec<(Region, Preparation)>,
    /// Instance profile outcome.
    pub instance_profile: Preparation,
}

/// Errors returned by [`AccountBootstrap::run`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// Raised when the public key is blank.
    #[error("missing {field}")]
    InvalidInput {
        /// Name of the missing field.
        field: String,
    },
    /// Raised when a key pair import fails in a region.
    #[error("key pair import failed in {region}: {source}")]
    KeyImport {
        /// Region that rejected the key.
        region: Region,
        /// Provider failure.
        #[source]
        source: ComputeError,
    },
    /// Raised when the execution profile cannot be created.
    #[error("instance profile creation failed: {0}")]
    InstanceProfile(#[source] ComputeError),
    /// Raised when the regions cannot be listed.
    #[error(transparent)]
    Remote(#[from] ComputeError),
}

fn prepared(result: Result<(), ComputeError>) -> Result<Preparation, ComputeError> {
    match result {
        Ok(()) => Ok(Preparation::Created),
        Err(err) if err.is_already_exists() => Ok(Preparation::AlreadyPresent),
        Err(err) => Err(err),
    }
}

/// Prepares an account for launching networks.
#[derive(Debug)]
pub struct AccountBootstrap<'a, C: ?Sized> {
    compute: &'a C,
    config: &'a FleetConfig,
}

impl<'a, C: RemoteCompute + ?Sized> AccountBootstrap<'a, C> {
    /// Borrows the compute capability and configuration.
    #[must_use]
    pub const fn new(compute: &'a C, config: &'a FleetConfig) -> Self {
        Self { compute, config }
    }

    /// Imports the configured key pair into every region concurrently, then
    /// creates the configured instance profile.
    ///
    /// The profile is still attempted when some regions failed so a rerun
    /// only has the failed regions left to do.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::InvalidInput`] for a blank key, the first
    /// failed region as [`BootstrapError::KeyImport`], and
    /// [`BootstrapError::InstanceProfile`] when the profile call fails.
    pub async fn run(&self, public_key: &str) -> Result<BootstrapSummary, BootstrapError> {
        if public_key.trim().is_empty() {
            return Err(BootstrapError::InvalidInput {
                field: String::from("public_key"),
            });
        }
        let regions = self.compute.describe_regions().await?;
        let (key_pairs, failures) = settle(
            regions
                .iter()
                .map(|region| self.import_key_pair(region, public_key)),
        )
        .await
        .into_parts();
        for failure in &failures {
            if let BootstrapError::KeyImport { region, source } = failure {
                warn!(region = %region, key_name = %self.config.key_name, error = %source, "key pair import failed");
            }
        }

        let instance_profile = prepared(
            self.compute
                .create_instance_profile(
                    &self.config.instance_profile_name,
                    &self.config.instance_profile_policy_arn,
                )
                .await,
        )
        .map_err(BootstrapError::InstanceProfile)?;
        debug!(
            profile = %self.config.instance_profile_name,
            outcome = ?instance_profile,
            "instance profile prepared"
        );

        if let Some(failure) = failures.into_iter().next() {
            return Err(failure);
        }
        info!(
            regions = key_pairs.len(),
            key_name = %self.config.key_name,
            "account bootstrapped"
        );
        Ok(BootstrapSummary {
            key_pairs,
            instance_profile,
        })
    }

    async fn import_key_pair(
        &self,
        region: &Region,
        public_key: &str,
    ) -> Result<(Region, Preparation), BootstrapError> {
        let outcome = prepared(
            self.compute
                .import_key_pair(region, &self.config.key_name, public_key)
                .await,
        )
        .map_err(|source| BootstrapError::KeyImport {
            region: region.clone(),
            source,
        })?;
        debug!(region = %region, outcome = ?outcome, "key pair prepared");
        Ok((region.clone(), outcome))
    }
}
