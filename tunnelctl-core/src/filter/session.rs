//! Split tunnel redirect filters
//!
//! The split tunnel callout driver rewrites the connect/bind address of
//! selected applications. We register its callouts, hand it the target
//! address through a provider context and attach one callout filter per
//! (application, layer). Everything lives in one dynamic session so closing
//! it removes every object at once.

use super::redirect::ConnectRedirectData;
use super::{AppCalloutFilterDefinition, DisplayData, FilterEngine, FilterSession, Layer, ObjectKey};
use crate::NetResult;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Default weight of the split tunnel sublayer
pub const SPLIT_TUNNEL_SUBLAYER_WEIGHT: u16 = 10001;

/// Weight of each per-app callout filter inside the sublayer
const CALLOUT_FILTER_WEIGHT: u8 = 15;

pub const CONNECT_REDIRECT_V4_CALLOUT_KEY: ObjectKey =
    ObjectKey::from_u128(0x3c5a284f_af01_51fa_4361_6c6c50424144);
pub const CONNECT_REDIRECT_V6_CALLOUT_KEY: ObjectKey =
    ObjectKey::from_u128(0x3c5a284f_af01_51fa_4361_6c6c50424145);
pub const BIND_REDIRECT_V4_CALLOUT_KEY: ObjectKey =
    ObjectKey::from_u128(0x10636af3_50d6_4f53_acb7_d5af33217fca);
pub const BIND_REDIRECT_V6_CALLOUT_KEY: ObjectKey =
    ObjectKey::from_u128(0x10636af3_50d6_4f53_acb7_d5af33217faa);

struct ActiveSession {
    session: Box<dyn FilterSession>,
    provider: ObjectKey,
    sublayer: ObjectKey,
}

pub struct SplitTunnelFilters {
    engine: Arc<dyn FilterEngine>,
    sublayer_weight: u16,
    active: Option<ActiveSession>,
}

impl SplitTunnelFilters {
    pub fn new(engine: Arc<dyn FilterEngine>) -> Self {
        Self::with_sublayer_weight(engine, SPLIT_TUNNEL_SUBLAYER_WEIGHT)
    }

    pub fn with_sublayer_weight(engine: Arc<dyn FilterEngine>, sublayer_weight: u16) -> Self {
        Self {
            engine,
            sublayer_weight,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Redirect `apps` to the physical interface addresses so they bypass the tunnel
    pub fn enable_exclude_mode(
        &mut self,
        apps: &[String],
        local_ipv4: Ipv4Addr,
        local_ipv6: Option<Ipv6Addr>,
    ) -> NetResult<()> {
        self.enable(apps, local_ipv4, local_ipv6)
    }

    /// Redirect `apps` to the tunnel addresses so only they use the tunnel
    pub fn enable_include_mode(
        &mut self,
        apps: &[String],
        tunnel_ipv4: Ipv4Addr,
        tunnel_ipv6: Option<Ipv6Addr>,
    ) -> NetResult<()> {
        self.enable(apps, tunnel_ipv4, tunnel_ipv6)
    }

    /// Close the session, removing provider, sublayer, callouts and filters
    pub fn disable(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.session.close();
            log::debug!("Split tunnel filter session closed");
        }
    }

    fn enable(&mut self, apps: &[String], ipv4: Ipv4Addr, ipv6: Option<Ipv6Addr>) -> NetResult<()> {
        self.create()?;
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        active.session.start_transaction()?;
        match active.redirect(apps, ipv4, ipv6) {
            Ok(()) => active.session.commit_transaction(),
            Err(e) => {
                if let Err(abort_error) = active.session.abort_transaction() {
                    log::error!("Failed to abort filter transaction: {}", abort_error);
                }
                Err(e)
            }
        }
    }

    fn create(&mut self) -> NetResult<()> {
        // Callout keys are fixed, registering them twice in one session fails
        if self.active.is_some() {
            log::debug!("Replacing existing split tunnel filter session");
            self.disable();
        }

        let mut session = self.engine.open_dynamic_session()?;
        let created = session
            .add_provider(&DisplayData::new("TunnelCtl", "TunnelCtl split tunnel provider"))
            .and_then(|provider| {
                session
                    .add_sublayer(
                        provider,
                        &DisplayData::new("TunnelCtl split tunnel filters", ""),
                        self.sublayer_weight,
                    )
                    .map(|sublayer| (provider, sublayer))
            });

        match created {
            Ok((provider, sublayer)) => {
                self.active = Some(ActiveSession {
                    session,
                    provider,
                    sublayer,
                });
                Ok(())
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }
}

impl Drop for SplitTunnelFilters {
    fn drop(&mut self) {
        self.disable();
    }
}

impl ActiveSession {
    fn redirect(&mut self, apps: &[String], ipv4: Ipv4Addr, ipv6: Option<Ipv6Addr>) -> NetResult<()> {
        let connect_v4 = self.connect_redirect_callout(Layer::AppConnectRedirectV4, CONNECT_REDIRECT_V4_CALLOUT_KEY)?;
        let bind_v4 = self.bind_redirect_callout(Layer::BindRedirectV4, BIND_REDIRECT_V4_CALLOUT_KEY)?;

        let context_v4 = self.provider_context(IpAddr::V4(ipv4))?;
        self.app_callout_filters(apps, bind_v4, Layer::BindRedirectV4, context_v4);
        self.app_callout_filters(apps, connect_v4, Layer::AppConnectRedirectV4, context_v4);

        if let Some(ipv6) = ipv6 {
            let context_v6 = self.provider_context(IpAddr::V6(ipv6))?;
            let connect_v6 =
                self.connect_redirect_callout(Layer::AppConnectRedirectV6, CONNECT_REDIRECT_V6_CALLOUT_KEY)?;
            let bind_v6 = self.bind_redirect_callout(Layer::BindRedirectV6, BIND_REDIRECT_V6_CALLOUT_KEY)?;

            self.app_callout_filters(apps, connect_v6, Layer::AppConnectRedirectV6, context_v6);
            self.app_callout_filters(apps, bind_v6, Layer::BindRedirectV6, context_v6);
        }

        Ok(())
    }

    fn connect_redirect_callout(&mut self, layer: Layer, key: ObjectKey) -> NetResult<ObjectKey> {
        self.session.add_callout(
            key,
            self.provider,
            layer,
            &DisplayData::new("TunnelCtl split tunnel callout", "Redirects network connections"),
        )
    }

    fn bind_redirect_callout(&mut self, layer: Layer, key: ObjectKey) -> NetResult<ObjectKey> {
        self.session.add_callout(
            key,
            self.provider,
            layer,
            &DisplayData::new("TunnelCtl split tunnel callout", "Redirects UDP network flow"),
        )
    }

    fn provider_context(&mut self, address: IpAddr) -> NetResult<ObjectKey> {
        let data = ConnectRedirectData::new(address).encode();
        self.session.add_provider_context(
            self.provider,
            &DisplayData::new(
                "TunnelCtl split tunnel redirect context",
                "Instructs the callout driver where to redirect network connections",
            ),
            &data,
        )
    }

    fn app_callout_filters(&mut self, apps: &[String], callout: ObjectKey, layer: Layer, context: ObjectKey) {
        for app in apps {
            let filter = AppCalloutFilterDefinition {
                display: DisplayData::new(
                    "TunnelCtl split tunnel redirect app",
                    "Redirects network connections of the app",
                ),
                sublayer: self.sublayer,
                layer,
                weight: CALLOUT_FILTER_WEIGHT,
                callout,
                provider_context: context,
                app_path: app.clone(),
                persistent: false,
            };

            // One unusable path must not take the other apps down with it
            if let Err(e) = self.session.add_app_callout_filter(&filter) {
                log::warn!("Skipping redirect filter for '{}' on {}: {}", app, layer, e);
            }
        }
    }
}
