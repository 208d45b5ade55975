//! Desired DependentDeployment derivation
//!
//! Pure and deterministic: the same InstallRequest spec and PackageVersion
//! always produce the same DeploymentSpec. The package template is copied as
//! is and user values travel next to it, never merged into it.

use crate::error::ValidationError;
use crate::schema;
use pkgi_types::{DeploymentSpec, InstallRequest, PackageCoordinates, PackageVersion};
use serde_json::{Map, Value};

/// Build the DependentDeployment spec for `install` at `package`
pub fn derive(
    install: &InstallRequest,
    package: &PackageVersion,
) -> Result<DeploymentSpec, ValidationError> {
    validate_values(install, package)?;

    let spec = &install.spec;
    Ok(DeploymentSpec {
        service_account_name: spec.service_account_name.clone(),
        sync_period: spec.sync_period,
        paused: spec.paused,
        canceled: spec.canceled,
        package: PackageCoordinates {
            ref_name: package.spec.ref_name.clone(),
            version: package.spec.version.clone(),
        },
        template: package.spec.template.clone(),
        values: spec.values.clone(),
    })
}

fn validate_values(
    install: &InstallRequest,
    package: &PackageVersion,
) -> Result<(), ValidationError> {
    let Some(schema) = &package.spec.values_schema else {
        return Ok(());
    };

    let empty = Value::Object(Map::new());
    let values = install.spec.values.as_ref().unwrap_or(&empty);
    let violations = schema::validate(&schema.open_api_v3, values);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            ref_name: package.spec.ref_name.clone(),
            version: package.spec.version.clone(),
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgi_types::{DeployStep, DeploymentTemplate, FetchStep, TemplateStep};
    use serde_json::json;
    use std::time::Duration;

    fn package() -> PackageVersion {
        PackageVersion::new(
            "default",
            "nginx.pkg.dev",
            "1.1.0",
            DeploymentTemplate {
                fetch: vec![FetchStep::ImgpkgBundle {
                    image: "registry.example/nginx-bundle:1.1.0".into(),
                }],
                template: vec![TemplateStep::Ytt { paths: vec!["config".into()] }],
                deploy: vec![DeployStep::Kapp { raw_options: vec![] }],
            },
        )
        .with_values_schema(json!({
            "type": "object",
            "properties": {"replicas": {"type": "integer", "minimum": 1}}
        }))
    }

    fn install() -> InstallRequest {
        InstallRequest::new("default", "nginx", "nginx.pkg.dev", "1.x")
            .with_service_account("nginx-sa")
            .with_sync_period(Duration::from_secs(120))
            .with_values(json!({"replicas": 2, "annotations": {"b": "2", "a": "1"}}))
    }

    #[test]
    fn test_template_is_copied_and_values_kept_apart() {
        let pv = package();
        let spec = derive(&install(), &pv).unwrap();

        assert_eq!(spec.template, pv.spec.template);
        assert_eq!(spec.values, Some(json!({"replicas": 2, "annotations": {"a": "1", "b": "2"}})));
        assert_eq!(spec.package.version, "1.1.0");
        assert_eq!(spec.service_account_name, "nginx-sa");
        assert_eq!(spec.sync_period, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_derivation_is_byte_identical() {
        let a = serde_json::to_vec(&derive(&install(), &package()).unwrap()).unwrap();
        let b = serde_json::to_vec(&derive(&install(), &package()).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = install().with_values(json!({"replicas": 0}));
        let err = derive(&bad, &package()).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].path, "$.replicas");
        assert!(err.to_string().contains("nginx.pkg.dev 1.1.0"));
    }

    #[test]
    fn test_missing_values_validate_as_empty_object() {
        let mut pv = package();
        pv.spec.values_schema = Some(pkgi_types::ValuesSchema {
            open_api_v3: json!({"type": "object", "required": ["replicas"]}),
        });
        let mut bare = install();
        bare.spec.values = None;

        let err = derive(&bare, &pv).unwrap_err();
        assert_eq!(err.violations[0].path, "$");

        pv.spec.values_schema = Some(pkgi_types::ValuesSchema {
            open_api_v3: json!({"type": "object"}),
        });
        assert!(derive(&bare, &pv).unwrap().values.is_none());
    }
}
