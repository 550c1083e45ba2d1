//! Service giving a policy server its stable network identity
//!
//! Webhook registrations point at this service, so its name must stay a
//! pure function of the server name.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::resources::common::{
    name_with_prefix, owner_reference, selector_labels, standard_labels,
    POLICY_SERVER_METRICS_PORT, POLICY_SERVER_PORT,
};

/// Generate the Service of a policy server
pub fn generate_service(server: &PolicyServer, namespace: &str, metrics_enabled: bool) -> Service {
    let server_name = server.name_any();

    let mut ports = vec![ServicePort {
        name: Some("policy-server".to_string()),
        port: POLICY_SERVER_PORT,
        target_port: Some(IntOrString::Int(POLICY_SERVER_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if metrics_enabled {
        ports.push(ServicePort {
            name: Some("metrics".to_string()),
            port: POLICY_SERVER_METRICS_PORT,
            target_port: Some(IntOrString::Int(POLICY_SERVER_METRICS_PORT)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    Service {
        metadata: ObjectMeta {
            name: Some(name_with_prefix(&server_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(&server_name)),
            owner_references: Some(vec![owner_reference(server)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&server_name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}
