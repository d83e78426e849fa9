use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

/// A port declared in a service spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortRecord {
    pub port: i32,
    pub protocol: String,
}

/// An address assigned to a service by its load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalEndpoint {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

impl ExternalEndpoint {
    /// The IP when one is assigned, otherwise the hostname. Blank values count as unset.
    pub fn address(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.hostname.as_deref().filter(|host| !host.is_empty()))
    }
}

impl From<&LoadBalancerIngress> for ExternalEndpoint {
    fn from(ingress: &LoadBalancerIngress) -> ExternalEndpoint {
        ExternalEndpoint {
            ip: ingress.ip.clone(),
            hostname: ingress.hostname.clone(),
        }
    }
}

/// Read-only snapshot of a cluster service, keeping only what discovery looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<ServicePortRecord>,
    pub external_endpoints: Vec<ExternalEndpoint>,
}

/// Read-only snapshot of an ingress resource. `rules` holds each rule's host in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressRecord {
    pub name: String,
    pub namespace: String,
    pub rules: Vec<Option<String>>,
}

trait ServiceExt {
    fn port_records(&self) -> Vec<ServicePortRecord>;
    fn load_balancer_ingress(&self) -> Vec<ExternalEndpoint>;
}

impl ServiceExt for Service {
    fn port_records(&self) -> Vec<ServicePortRecord> {
        self.spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|port| ServicePortRecord {
                        port: port.port,
                        protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_owned()),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    fn load_balancer_ingress(&self) -> Vec<ExternalEndpoint> {
        self.status
            .as_ref()
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|load_balancer| load_balancer.ingress.as_ref())
            .map(|ingress| ingress.iter().map(ExternalEndpoint::from).collect::<Vec<_>>())
            .unwrap_or_default()
    }
}

impl From<&Service> for ServiceRecord {
    fn from(service: &Service) -> ServiceRecord {
        ServiceRecord {
            name: service.name_any(),
            namespace: service.namespace().unwrap_or_default(),
            ports: service.port_records(),
            external_endpoints: service.load_balancer_ingress(),
        }
    }
}

impl From<&Ingress> for IngressRecord {
    fn from(ingress: &Ingress) -> IngressRecord {
        let rules = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.rules.as_ref())
            .map(|rules| rules.iter().map(|rule| rule.host.clone()).collect::<Vec<_>>())
            .unwrap_or_default();

        IngressRecord {
            name: ingress.name_any(),
            namespace: ingress.namespace().unwrap_or_default(),
            rules,
        }
    }
}
