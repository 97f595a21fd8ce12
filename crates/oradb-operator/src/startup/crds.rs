//! CRD rendering and installation
//!
//! The operator installs its own CRDs with server-side apply so the schema
//! always matches the binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use oradb_common::crd::{DataguardBroker, PluggableDatabase, SingleInstanceDatabase};
use oradb_common::FIELD_MANAGER;

/// Every CRD served by the operator
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        SingleInstanceDatabase::crd(),
        DataguardBroker::crd(),
        PluggableDatabase::crd(),
    ]
}

/// All CRDs as one multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        out.push_str("---\n");
        out.push_str(
            &serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?,
        );
    }
    Ok(out)
}

/// Install or update every CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generated CRD has no name"))?;
        tracing::info!("Installing {} CRD...", name);
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All oradb CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_kind_in_one_group() {
        let names: Vec<_> = all_crds()
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "singleinstancedatabases.database.oradb.io",
                "dataguardbrokers.database.oradb.io",
                "pluggabledatabases.database.oradb.io",
            ]
        );

        let yaml = render_crds().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 3);
        assert!(yaml.contains("shortNames"));
    }
}
