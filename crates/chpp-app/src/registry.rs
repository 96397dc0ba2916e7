use std::sync::Arc;

use chpp_transport::DatagramSender;
use tracing::info;

use crate::config::AppConfig;
use crate::dispatcher::App;
use crate::error::{AppError, Result};
use crate::handle::{negotiated_handle, MAX_NEGOTIATED};
use crate::service::{Client, ClientId, Service};

/// Collects registrations before traffic starts.
///
/// [`AppBuilder::build`] freezes the tables; there is no deregistration.
pub struct AppBuilder {
    config: AppConfig,
    services: Vec<Arc<dyn Service>>,
    clients: Vec<Arc<dyn Client>>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Register a service; returns the negotiated handle it answers on.
    pub fn register_service(&mut self, service: Arc<dyn Service>) -> Result<u8> {
        let handle = negotiated_handle(self.services.len())
            .ok_or(AppError::RegistrationFull(MAX_NEGOTIATED))?;

        let descriptor = service.descriptor();
        if self
            .services
            .iter()
            .any(|existing| existing.descriptor().uuid == descriptor.uuid)
        {
            return Err(AppError::InvalidDescriptor(format!(
                "service uuid {} registered twice",
                descriptor.uuid
            )));
        }

        info!(
            handle,
            name = %descriptor.name,
            version = %descriptor.version,
            "service registered"
        );
        self.services.push(service);
        Ok(handle)
    }

    /// Register a client. It stays unbound until discovery finds its service.
    pub fn register_client(&mut self, client: Arc<dyn Client>) -> Result<ClientId> {
        if self.clients.len() >= MAX_NEGOTIATED {
            return Err(AppError::RegistrationFull(MAX_NEGOTIATED));
        }
        let id = ClientId(self.clients.len());
        let descriptor = client.descriptor();
        info!(
            client = id.0,
            name = %descriptor.name,
            version = %descriptor.version,
            "client registered"
        );
        self.clients.push(client);
        Ok(id)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Freeze the tables and initialize every registration.
    pub fn build(self, sender: Arc<dyn DatagramSender>) -> Arc<App> {
        Arc::new(App::from_registrations(
            self.config,
            sender,
            self.services,
            self.clients,
        ))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::descriptor::{ClientDescriptor, ServiceDescriptor, Version};
    use crate::handle::NEGOTIATED_START;
    use crate::header::{AppErrorCode, Message};
    use crate::service::ServiceContext;

    struct Named(ServiceDescriptor);

    impl Service for Named {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.0
        }

        fn dispatch_request(
            &self,
            _ctx: &ServiceContext,
            _request: &Message,
        ) -> std::result::Result<(), AppErrorCode> {
            Ok(())
        }
    }

    struct Plain(ClientDescriptor);

    impl Client for Plain {
        fn descriptor(&self) -> &ClientDescriptor {
            &self.0
        }
    }

    fn service(n: u128) -> Arc<dyn Service> {
        Arc::new(Named(
            ServiceDescriptor::new(Uuid::from_u128(n), format!("svc-{n}"), Version::new(1, 0, 0))
                .unwrap(),
        ))
    }

    #[test]
    fn handles_are_sequential_from_negotiated_start() {
        let mut builder = AppBuilder::new();
        for n in 0..4u128 {
            assert_eq!(
                builder.register_service(service(n + 1)).unwrap(),
                NEGOTIATED_START + n as u8
            );
        }
        assert_eq!(builder.service_count(), 4);
    }

    #[test]
    fn table_full_is_reported() {
        let mut builder = AppBuilder::new();
        for n in 0..MAX_NEGOTIATED as u128 {
            builder.register_service(service(n + 1)).unwrap();
        }
        let err = builder.register_service(service(10_000)).unwrap_err();
        assert_eq!(err, AppError::RegistrationFull(MAX_NEGOTIATED));
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let mut builder = AppBuilder::new();
        builder.register_service(service(7)).unwrap();
        assert!(matches!(
            builder.register_service(service(7)),
            Err(AppError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn client_ids_follow_registration_order() {
        let mut builder = AppBuilder::new();
        for n in 0..3 {
            let client = Arc::new(Plain(ClientDescriptor::new(
                Uuid::from_u128(n),
                "c",
                Version::new(1, 0, 0),
            )));
            assert_eq!(builder.register_client(client).unwrap(), ClientId(n as usize));
        }
        assert_eq!(builder.client_count(), 3);
    }
}
