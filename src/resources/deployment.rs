//! Deployment running the policy server runtime

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::resources::common::{
    name_with_prefix, owner_reference, selector_labels, standard_labels,
    CONFIG_VERSION_ANNOTATION, POLICY_SERVER_METRICS_PORT, POLICY_SERVER_PORT,
    READINESS_PROBE_PATH,
};
use crate::resources::config_bundle::{POLICIES_ENTRY, SOURCES_ENTRY};
use crate::resources::secret::{SERVING_CERT_KEY, SERVING_KEY_KEY};

const CONTAINER_NAME: &str = "policy-server";
const CERTS_VOLUME: &str = "certs";
const CERTS_MOUNT_PATH: &str = "/pki";
const CONFIG_VOLUME: &str = "policies";
const CONFIG_MOUNT_PATH: &str = "/config";
const POLICIES_DOWNLOAD_DIR: &str = "/tmp";

/// Env var enabling the runtime's metrics endpoint
pub const ENABLE_METRICS_ENV: &str = "KUBEWARDEN_ENABLE_METRICS";

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Environment of the runtime container.
///
/// The wiring variables come first; user variables follow and win on
/// name clashes since later entries override earlier ones.
fn container_env(server: &PolicyServer, metrics_enabled: bool) -> Vec<EnvVar> {
    let mut vars = vec![
        env(
            "KUBEWARDEN_CERT_FILE",
            format!("{}/{}", CERTS_MOUNT_PATH, SERVING_CERT_KEY),
        ),
        env(
            "KUBEWARDEN_KEY_FILE",
            format!("{}/{}", CERTS_MOUNT_PATH, SERVING_KEY_KEY),
        ),
        env("KUBEWARDEN_PORT", POLICY_SERVER_PORT.to_string()),
        env("KUBEWARDEN_POLICIES_DOWNLOAD_DIR", POLICIES_DOWNLOAD_DIR),
        env(
            "KUBEWARDEN_POLICIES",
            format!("{}/{}", CONFIG_MOUNT_PATH, POLICIES_ENTRY),
        ),
        env(
            "KUBEWARDEN_SOURCES_PATH",
            format!("{}/{}", CONFIG_MOUNT_PATH, SOURCES_ENTRY),
        ),
    ];
    if metrics_enabled {
        vars.push(env(ENABLE_METRICS_ENV, "true"));
    }
    vars.extend(server.spec.env.iter().cloned());
    vars
}

/// Resource requirements of the runtime container.
///
/// Requests fall back to the limits when only limits are set.
pub fn resource_requirements(server: &PolicyServer) -> Option<ResourceRequirements> {
    let limits = &server.spec.limits;
    let requests = if server.spec.requests.is_empty() {
        limits
    } else {
        &server.spec.requests
    };

    if limits.is_empty() && requests.is_empty() {
        return None;
    }

    Some(ResourceRequirements {
        limits: (!limits.is_empty()).then(|| limits.clone()),
        requests: (!requests.is_empty()).then(|| requests.clone()),
        ..Default::default()
    })
}

/// Generate the Deployment of a policy server
///
/// `config_version` is stamped on the pod template so a new configuration
/// bundle rolls the pods.
pub fn generate_deployment(
    server: &PolicyServer,
    namespace: &str,
    config_version: &str,
    metrics_enabled: bool,
) -> Deployment {
    let server_name = server.name_any();
    let name = name_with_prefix(&server_name);
    let labels = standard_labels(&server_name);

    let mut template_annotations = server.spec.annotations.clone();
    template_annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        config_version.to_string(),
    );

    let mut ports = vec![ContainerPort {
        name: Some("policy-server".to_string()),
        container_port: POLICY_SERVER_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if metrics_enabled {
        ports.push(ContainerPort {
            name: Some("metrics".to_string()),
            container_port: POLICY_SERVER_METRICS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(server.spec.image.clone()),
        env: Some(container_env(server, metrics_enabled)),
        ports: Some(ports),
        resources: resource_requirements(server),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(READINESS_PROBE_PATH.to_string()),
                port: IntOrString::Int(POLICY_SERVER_PORT),
                scheme: Some("HTTPS".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CERTS_VOLUME.to_string(),
                mount_path: CERTS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(server)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(server.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&server_name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(template_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    service_account_name: server.spec.service_account_name.clone(),
                    volumes: Some(vec![
                        Volume {
                            name: CERTS_VOLUME.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(name.clone()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: CONFIG_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: name.clone(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether the workload serves the current bundle with all desired replicas.
///
/// Pods of a rollout still in progress run the previous bundle, so the
/// Deployment only counts once its controller has observed the latest spec
/// and replaced every replica. A deployment scaled to zero never counts as
/// ready, since webhooks pointed at it would have nothing to call.
pub fn is_workload_ready(deployment: &Deployment, desired: i32) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let generation = deployment.metadata.generation.unwrap_or(0);
    let rolled_out = status.observed_generation.unwrap_or(0) >= generation
        && status.updated_replicas.unwrap_or(0) >= desired;
    desired > 0 && rolled_out && status.ready_replicas.unwrap_or(0) >= desired
}
