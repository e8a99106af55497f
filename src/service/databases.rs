// ABOUTME: Computes the env entries that link a container to a database container.
// ABOUTME: Values come from the provider's env rows, published ports and template defaults.

use crate::error::{Error, Result};
use crate::model::Resources;
use crate::template::{DatabaseEnvNames, DatabaseFeature, DatabaseRole, Template};
use crate::types::ContainerId;

/// Connection details read from a database-providing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkValues {
    pub host: String,
    pub port: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

fn provided_feature<'a>(
    role: &DatabaseRole,
    provider: &'a Template,
    provider_id: &ContainerId,
) -> Result<&'a DatabaseFeature> {
    let features = &provider.features.databases;
    features
        .iter()
        .find(|f| role.types.is_empty() || role.types.contains(&f.kind))
        .ok_or_else(|| {
            Error::Validation(format!(
                "container {provider_id} provides no database of type {}",
                role.types.join(", ")
            ))
        })
}

pub(crate) fn link_values(
    role: &DatabaseRole,
    provider_id: &ContainerId,
    provider: &Template,
    provider_rows: &Resources,
    host: &str,
    database_override: Option<&str>,
) -> Result<LinkValues> {
    let feature = provided_feature(role, provider, provider_id)?;
    let env = |name: &Option<String>| {
        name.as_deref()
            .and_then(|n| provider_rows.env_value(n))
            .map(str::to_string)
    };

    // Migrated templates keep port entries in `ports`, not in the environment.
    let inner_port = provider_rows
        .env_value(&feature.port)
        .map(str::to_string)
        .or_else(|| {
            provider
                .ports
                .iter()
                .find(|p| p.name == feature.port)
                .map(|p| p.port.clone())
        });
    // A published port is reached on the host through its external number.
    let port = inner_port.map(|inner| {
        provider_rows
            .ports
            .iter()
            .find(|p| p.internal == inner)
            .map(|p| p.external.clone())
            .unwrap_or(inner)
    });

    let database = match database_override {
        Some(name) => Some(name.to_string()),
        None => feature
            .database
            .as_deref()
            .and_then(|n| provider.env_default(n))
            .map(str::to_string),
    };

    Ok(LinkValues {
        host: host.to_string(),
        port,
        username: env(&feature.username),
        password: env(&feature.password),
        database,
    })
}

/// Env entries to write into the consuming container.
///
/// A `None` value means the entry is removed.
pub(crate) fn env_writes(
    names: &DatabaseEnvNames,
    values: LinkValues,
) -> Vec<(String, Option<String>)> {
    let pairs = [
        (&names.host, Some(values.host)),
        (&names.port, values.port),
        (&names.username, values.username),
        (&names.password, values.password),
        (&names.database, values.database),
    ];
    pairs
        .into_iter()
        .filter_map(|(name, value)| name.clone().map(|n| (n, value)))
        .collect()
}
