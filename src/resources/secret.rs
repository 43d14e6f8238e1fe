//! Generated credential secret.
//!
//! The secret is only populated when it is first created. The engine never
//! applies this builder to a secret that already exists, so a password, once
//! generated, survives every later reconciliation.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::controller::error::Error;
use crate::crd::Redis;
use crate::resources::common::{
    PASSWORD_KEY, SHARED_COMPONENT, auth_secret_name, component_labels, identity_meta, parent_name,
};

/// Number of random bytes in a generated password.
pub const PASSWORD_BYTES: usize = 24;

/// Builder for `<name>-auth-secret`.
#[derive(Clone, Copy, Debug)]
pub struct AuthSecretBuilder<'a> {
    redis: &'a Redis,
}

impl<'a> AuthSecretBuilder<'a> {
    pub fn new(redis: &'a Redis) -> Self {
        Self { redis }
    }

    pub fn name(&self) -> String {
        auth_secret_name(&self.redis.name_any())
    }

    /// A secret is generated only when no existing one is referenced.
    pub fn should_exist(&self) -> bool {
        self.redis.spec.common.auth.existing_secret().is_none()
    }

    pub fn build_identity(&self) -> Result<Secret, Error> {
        let name = auth_secret_name(parent_name(self.redis)?);
        Ok(Secret {
            metadata: identity_meta(self.redis, name)?,
            ..Default::default()
        })
    }

    /// Label the secret and replace its payload with a fresh password.
    pub fn apply_desired_state(&self, secret: &mut Secret) -> Result<(), Error> {
        let password = generate_password()?;

        secret.metadata.labels = Some(component_labels(
            &self.redis.name_any(),
            SHARED_COMPONENT,
        ));
        secret.type_ = Some("Opaque".to_string());
        secret.data = Some(BTreeMap::from([(
            PASSWORD_KEY.to_string(),
            ByteString(password.into_bytes()),
        )]));
        Ok(())
    }
}

/// URL-safe base64 of `PASSWORD_BYTES` bytes from the OS CSPRNG.
pub fn generate_password() -> Result<String, Error> {
    let mut raw = [0u8; PASSWORD_BYTES];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| Error::InvariantViolation(format!("secure randomness unavailable: {e}")))?;
    Ok(URL_SAFE.encode(raw))
}
