//! Metadata provider session.
//!
//! Every request is answered independently: each verb has one handler slot,
//! and a verb without a handler is answered by the default policy.

use crate::config::SessionConfig;
use crate::error::AdapterError;
use crate::outbound::{Outbound, StreamMode};
use crate::response::Response;
use crate::session::{Phase, SessionCore};
use ari_protocol::metadata::{self, MetadataFamily, MetadataMessage, MetadataRequest, MetadataVerb};
use ari_protocol::{
    GetItemDataRequest, GetItemsRequest, GetSchemaRequest, GetUserItemDataRequest, ItemData,
    MpnDeviceAccessRequest, MpnDeviceTokenChangeRequest, MpnSubscriptionActivationRequest,
    NotifyNewSessionRequest, NotifyNewTablesRequest, NotifySessionCloseRequest,
    NotifyTablesCloseRequest, NotifyUserMessageRequest, NotifyUserRequest, ReplyPayload,
    UserAuthorization, UserItemData,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for one verb: receives the decoded request and the handle to
/// answer it with.
pub type Handler<Req, T> = Arc<dyn Fn(Req, Response<T>) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    init: Option<Handler<HashMap<String, Option<String>>, ()>>,
    get_item_data: Option<Handler<GetItemDataRequest, Vec<ItemData>>>,
    get_user_item_data: Option<Handler<GetUserItemDataRequest, Vec<UserItemData>>>,
    get_schema: Option<Handler<GetSchemaRequest, Vec<String>>>,
    get_items: Option<Handler<GetItemsRequest, Vec<String>>>,
    notify_user: Option<Handler<NotifyUserRequest, UserAuthorization>>,
    notify_user_auth: Option<Handler<NotifyUserRequest, UserAuthorization>>,
    notify_user_message: Option<Handler<NotifyUserMessageRequest, ()>>,
    notify_new_session: Option<Handler<NotifyNewSessionRequest, ()>>,
    notify_session_close: Option<Handler<NotifySessionCloseRequest, ()>>,
    notify_new_tables: Option<Handler<NotifyNewTablesRequest, ()>>,
    notify_tables_close: Option<Handler<NotifyTablesCloseRequest, ()>>,
    notify_mpn_device_access: Option<Handler<MpnDeviceAccessRequest, ()>>,
    notify_mpn_subscription_activation: Option<Handler<MpnSubscriptionActivationRequest, ()>>,
    notify_mpn_device_token_change: Option<Handler<MpnDeviceTokenChangeRequest, ()>>,
}

/// Builder for [`MetadataProvider`]. Every handler is optional.
#[derive(Default)]
pub struct MetadataProviderBuilder {
    config: SessionConfig,
    handlers: Handlers,
}

impl MetadataProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_init<F>(mut self, handler: F) -> Self
    where
        F: Fn(HashMap<String, Option<String>>, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.init = Some(Arc::new(handler));
        self
    }

    pub fn on_get_item_data<F>(mut self, handler: F) -> Self
    where
        F: Fn(GetItemDataRequest, Response<Vec<ItemData>>) + Send + Sync + 'static,
    {
        self.handlers.get_item_data = Some(Arc::new(handler));
        self
    }

    pub fn on_get_user_item_data<F>(mut self, handler: F) -> Self
    where
        F: Fn(GetUserItemDataRequest, Response<Vec<UserItemData>>) + Send + Sync + 'static,
    {
        self.handlers.get_user_item_data = Some(Arc::new(handler));
        self
    }

    /// Handler answering with the field names of a schema.
    pub fn on_get_schema<F>(mut self, handler: F) -> Self
    where
        F: Fn(GetSchemaRequest, Response<Vec<String>>) + Send + Sync + 'static,
    {
        self.handlers.get_schema = Some(Arc::new(handler));
        self
    }

    /// Handler answering with the item names of a group.
    pub fn on_get_items<F>(mut self, handler: F) -> Self
    where
        F: Fn(GetItemsRequest, Response<Vec<String>>) + Send + Sync + 'static,
    {
        self.handlers.get_items = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_user<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyUserRequest, Response<UserAuthorization>) + Send + Sync + 'static,
    {
        self.handlers.notify_user = Some(Arc::new(handler));
        self
    }

    /// Like [`on_notify_user`](Self::on_notify_user), for peers that also
    /// pass the client certificate principal.
    pub fn on_notify_user_auth<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyUserRequest, Response<UserAuthorization>) + Send + Sync + 'static,
    {
        self.handlers.notify_user_auth = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_user_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyUserMessageRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_user_message = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_new_session<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyNewSessionRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_new_session = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_session_close<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifySessionCloseRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_session_close = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_new_tables<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyNewTablesRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_new_tables = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_tables_close<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotifyTablesCloseRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_tables_close = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_mpn_device_access<F>(mut self, handler: F) -> Self
    where
        F: Fn(MpnDeviceAccessRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_mpn_device_access = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_mpn_subscription_activation<F>(mut self, handler: F) -> Self
    where
        F: Fn(MpnSubscriptionActivationRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_mpn_subscription_activation = Some(Arc::new(handler));
        self
    }

    pub fn on_notify_mpn_device_token_change<F>(mut self, handler: F) -> Self
    where
        F: Fn(MpnDeviceTokenChangeRequest, Response<()>) + Send + Sync + 'static,
    {
        self.handlers.notify_mpn_device_token_change = Some(Arc::new(handler));
        self
    }

    /// Builds the session and writes the credentials handshake.
    pub fn build(self, stream: Outbound) -> Result<MetadataProvider, AdapterError> {
        let core = Arc::new(SessionCore::new(StreamMode::Single(stream), self.config));
        core.send_credentials()?;
        tracing::info!("[{}] metadata provider started", core.log_id);

        Ok(MetadataProvider {
            inner: Arc::new(Inner {
                core,
                handlers: self.handlers,
            }),
        })
    }
}

struct Inner {
    core: Arc<SessionCore>,
    handlers: Handlers,
}

/// A metadata provider session.
#[derive(Clone)]
pub struct MetadataProvider {
    inner: Arc<Inner>,
}

impl MetadataProvider {
    pub fn builder() -> MetadataProviderBuilder {
        MetadataProviderBuilder::new()
    }

    pub fn log_id(&self) -> &str {
        &self.inner.core.log_id
    }

    pub fn phase(&self) -> Phase {
        self.inner.core.phase()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Handles one inbound message.
    ///
    /// Errors are fatal for the session.
    pub fn handle(&self, message: MetadataMessage) -> Result<(), AdapterError> {
        let core = &self.inner.core;
        let handlers = &self.inner.handlers;
        tracing::debug!("[{}] << {} {:?}", core.log_id, message.id, message.body);

        let id = message.id;
        let request = match message.body {
            MetadataRequest::Keepalive => return Ok(()),
            MetadataRequest::Close(close) => return Err(core.close_by_peer(close.reason)),
            MetadataRequest::Init(init) => {
                core.begin_init(&init)?;
                let response = core.init_response(id, MetadataVerb::Init.code(), &init);
                return match handlers.init {
                    Some(ref handler) => {
                        handler(init.params, response);
                        Ok(())
                    }
                    None => response.success(()),
                };
            }
            request => request,
        };

        if let Some(verb) = request.verb() {
            core.check_operational(verb.code())?;
        }

        match request {
            MetadataRequest::GetItemData(req) => {
                self.dispatch(id, MetadataVerb::GetItemData, req, &handlers.get_item_data, |r| {
                    vec![ItemData::default(); r.items.len()]
                })
            }
            MetadataRequest::GetUserItemData(req) => self.dispatch(
                id,
                MetadataVerb::GetUserItemData,
                req,
                &handlers.get_user_item_data,
                |r| vec![UserItemData::default(); r.items.len()],
            ),
            MetadataRequest::GetSchema(req) => {
                self.dispatch(id, MetadataVerb::GetSchema, req, &handlers.get_schema, |r| {
                    split_names(&r.schema)
                })
            }
            MetadataRequest::GetItems(req) => {
                self.dispatch(id, MetadataVerb::GetItems, req, &handlers.get_items, |r| {
                    split_names(&r.group)
                })
            }
            MetadataRequest::NotifyUser(req) => {
                self.dispatch(id, MetadataVerb::NotifyUser, req, &handlers.notify_user, |_| {
                    default_authorization()
                })
            }
            MetadataRequest::NotifyUserAuth(req) => self.dispatch(
                id,
                MetadataVerb::NotifyUserAuth,
                req,
                &handlers.notify_user_auth,
                |_| default_authorization(),
            ),
            MetadataRequest::NotifyUserMessage(req) => self.dispatch(
                id,
                MetadataVerb::NotifyUserMessage,
                req,
                &handlers.notify_user_message,
                |_| (),
            ),
            MetadataRequest::NotifyNewSession(req) => self.dispatch(
                id,
                MetadataVerb::NotifyNewSession,
                req,
                &handlers.notify_new_session,
                |_| (),
            ),
            MetadataRequest::NotifySessionClose(req) => self.dispatch(
                id,
                MetadataVerb::NotifySessionClose,
                req,
                &handlers.notify_session_close,
                |_| (),
            ),
            MetadataRequest::NotifyNewTables(req) => self.dispatch(
                id,
                MetadataVerb::NotifyNewTables,
                req,
                &handlers.notify_new_tables,
                |_| (),
            ),
            MetadataRequest::NotifyTablesClose(req) => self.dispatch(
                id,
                MetadataVerb::NotifyTablesClose,
                req,
                &handlers.notify_tables_close,
                |_| (),
            ),
            MetadataRequest::NotifyMpnDeviceAccess(req) => self.dispatch(
                id,
                MetadataVerb::NotifyMpnDeviceAccess,
                req,
                &handlers.notify_mpn_device_access,
                |_| (),
            ),
            MetadataRequest::NotifyMpnSubscriptionActivation(req) => self.dispatch(
                id,
                MetadataVerb::NotifyMpnSubscriptionActivation,
                req,
                &handlers.notify_mpn_subscription_activation,
                |_| (),
            ),
            MetadataRequest::NotifyMpnDeviceTokenChange(req) => self.dispatch(
                id,
                MetadataVerb::NotifyMpnDeviceTokenChange,
                req,
                &handlers.notify_mpn_device_token_change,
                |_| (),
            ),
            // handled above
            MetadataRequest::Init(_) | MetadataRequest::Close(_) | MetadataRequest::Keepalive => {
                Ok(())
            }
        }
    }

    /// Hands the request to its handler, or answers it with `fallback`.
    fn dispatch<Req, T, D>(
        &self,
        id: String,
        verb: MetadataVerb,
        request: Req,
        handler: &Option<Handler<Req, T>>,
        fallback: D,
    ) -> Result<(), AdapterError>
    where
        T: ReplyPayload + 'static,
        D: FnOnce(&Req) -> T,
    {
        let response = self.response(id, verb);
        match handler {
            Some(handler) => {
                handler(request, response);
                Ok(())
            }
            None => response.success(fallback(&request)),
        }
    }

    fn response<T>(&self, id: String, verb: MetadataVerb) -> Response<T>
    where
        T: ReplyPayload + 'static,
    {
        let core = Arc::clone(&self.inner.core);
        let check_id = id.clone();
        Response::with_check(
            move |outcome: Result<T, _>| {
                core.ensure_open()?;
                let frame = match outcome {
                    Ok(payload) => metadata::write_reply(&id, verb, &payload)?,
                    Err(exception) => metadata::write_exception(&id, verb, &exception),
                };
                core.write_reply(frame)
            },
            // unencodable payloads leave the request open for an error reply
            move |payload: &T| {
                metadata::write_reply(&check_id, verb, payload)?;
                Ok(())
            },
        )
    }

    /// Closes the session.
    pub fn shutdown(&self) {
        self.inner.core.shutdown();
    }
}

fn split_names(names: &str) -> Vec<String> {
    names.split_whitespace().map(str::to_string).collect()
}

fn default_authorization() -> UserAuthorization {
    UserAuthorization {
        allowed_max_bandwidth: Some(0.0),
        wants_tables_notification: false,
    }
}

impl crate::connection::InboundSession for MetadataProvider {
    type Family = MetadataFamily;

    fn handle(&self, message: MetadataMessage) -> Result<(), AdapterError> {
        MetadataProvider::handle(self, message)
    }

    fn shutdown(&self) {
        MetadataProvider::shutdown(self)
    }

    fn log_id(&self) -> &str {
        MetadataProvider::log_id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::outbound;
    use ari_protocol::{Exception, ExceptionKind, LineFramer, ModeSet};
    use parking_lot::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config() -> SessionConfig {
        SessionConfig {
            keepalive_ms: 0,
            ..Default::default()
        }
    }

    fn start(builder: MetadataProviderBuilder) -> (MetadataProvider, UnboundedReceiver<String>) {
        let (out, mut rx) = outbound();
        let provider = builder.config(test_config()).build(out).unwrap();
        assert!(rx.try_recv().unwrap().starts_with("1|RAC|"));
        (provider, rx)
    }

    fn feed(provider: &MetadataProvider, input: &str) -> Result<(), AdapterError> {
        let mut framer = LineFramer::<MetadataFamily>::new();
        framer.feed(input.as_bytes())?;
        while let Some(message) = framer.pop() {
            provider.handle(message)?;
        }
        Ok(())
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if frame != "KEEPALIVE\n" {
                frames.push(frame);
            }
        }
        frames
    }

    fn started_defaults() -> (MetadataProvider, UnboundedReceiver<String>) {
        let (provider, mut rx) = start(MetadataProvider::builder());
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n").unwrap();
        assert_eq!(drain(&mut rx), vec!["1|MPI|S|ARI.version|S|1.8.2\n"]);
        (provider, rx)
    }

    #[test]
    fn test_default_policy_lookups() {
        let (provider, mut rx) = started_defaults();
        feed(
            &provider,
            "2|GIS|S|bob|S|item1+item2|S|S1\n\
             3|GSC|S|bob|S|grp|S|bid+ask|S|S1\n\
             4|GIT|S|item1|S|item2\n\
             5|GUI|S|bob|S|item1\n\
             6|GIS|S|#|S|$|S|S1\n",
        )
        .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                "2|GIS|S|item1|S|item2\n",
                "3|GSC|S|bid|S|ask\n",
                "4|GIT|I|0|D|0|M|RMDC|I|0|D|0|M|RMDC\n",
                "5|GUI|I|0|D|0|M|RMDC\n",
                "6|GIS|V\n",
            ]
        );
    }

    #[test]
    fn test_default_policy_notifications() {
        let (provider, mut rx) = started_defaults();
        feed(
            &provider,
            "2|NUS|S|bob|S|secret|S|REMOTE_IP|S|1.2.3.4\n\
             3|NUA|S|bob|S|#|S|CN%3Dbob\n\
             4|NNS|S|bob|S|S1|S|REMOTE_IP|S|1.2.3.4\n\
             5|NUM|S|bob|S|S1|S|hello\n\
             6|NNT|S|bob|S|S1|I|1|M|M|S|grp|S|#|S|sch|I|1|I|2|S|#\n\
             7|NTC|S|S1|I|1|M|M|S|grp|S|#|S|sch|I|1|I|2|S|#\n\
             8|NSC|S|S1\n\
             9|MDA|S|bob|S|S1|S|Google|S|app|S|tok\n\
             10|MDC|S|bob|S|S1|S|Google|S|app|S|old|S|new\n",
        )
        .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                "2|NUS|D|0|B|0\n",
                "3|NUA|D|0|B|0\n",
                "4|NNS|V\n",
                "5|NUM|V\n",
                "6|NNT|V\n",
                "7|NTC|V\n",
                "8|NSC|V\n",
                "9|MDA|V\n",
                "10|MDC|V\n",
            ]
        );
    }

    #[test]
    fn test_handler_replies() {
        let pending: Arc<Mutex<Option<Response<Vec<ItemData>>>>> = Arc::default();
        let slot = Arc::clone(&pending);
        let (provider, mut rx) = start(
            MetadataProvider::builder()
                .on_get_item_data(move |req, response| {
                    assert_eq!(req.items, vec!["item1".to_string(), "item 2".to_string()]);
                    *slot.lock() = Some(response);
                })
                .on_notify_user(|req, response| {
                    assert_eq!(req.user.as_deref(), Some("bob"));
                    response
                        .success(UserAuthorization {
                            allowed_max_bandwidth: Some(40.0),
                            wants_tables_notification: true,
                        })
                        .unwrap();
                }),
        );
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n").unwrap();
        drain(&mut rx);

        feed(&provider, "7|GIT|S|item1|S|item+2\n3|NUS|S|bob|S|#\n").unwrap();
        assert_eq!(drain(&mut rx), vec!["3|NUS|D|40|B|1\n"]);

        let response = pending.lock().take().unwrap();
        response
            .success(vec![
                ItemData::default(),
                ItemData {
                    distinct_snapshot_length: None,
                    min_source_frequency: Some(1.5),
                    allowed_modes: ModeSet::new().with_merge(),
                },
            ])
            .unwrap();
        assert_eq!(
            drain(&mut rx),
            vec!["7|GIT|I|0|D|0|M|RMDC|I|#|D|1.5|M|M\n"]
        );
    }

    #[test]
    fn test_handler_exceptions() {
        let (provider, mut rx) = start(
            MetadataProvider::builder()
                .on_notify_new_session(|_, response| {
                    response
                        .error(
                            Exception::new(ExceptionKind::ConflictingSession, "already in")
                                .with_client_info(3, "busy")
                                .with_conflicting_session("S0"),
                        )
                        .unwrap();
                })
                .on_get_schema(|_, response| {
                    response
                        .error(Exception::new(ExceptionKind::Schema, "unknown"))
                        .unwrap();
                }),
        );
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n").unwrap();
        drain(&mut rx);

        feed(
            &provider,
            "4|NNS|S|bob|S|S1\n5|GSC|S|bob|S|grp|S|sch|S|S1\n",
        )
        .unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                "4|NNS|EX|already+in|3|busy|S0\n",
                "5|GSC|ES|unknown\n",
            ]
        );
    }

    #[test]
    fn test_empty_mode_set_keeps_request_answerable() {
        let outcomes: Arc<Mutex<Vec<Result<(), AdapterError>>>> = Arc::default();
        let seen = Arc::clone(&outcomes);
        let (provider, mut rx) = start(MetadataProvider::builder().on_get_user_item_data(
            move |_, response| {
                let first = response.success(vec![UserItemData {
                    allowed_modes: ModeSet::new(),
                    ..Default::default()
                }]);
                let second = response.error(Exception::generic("no modes"));
                seen.lock().extend([first, second]);
            },
        ));
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n").unwrap();
        drain(&mut rx);

        feed(&provider, "5|GUI|S|bob|S|item1\n").unwrap();
        let outcomes = outcomes.lock();
        assert!(matches!(outcomes[0], Err(AdapterError::Protocol(_))));
        assert!(outcomes[1].is_ok());
        assert_eq!(drain(&mut rx), vec!["5|GUI|E|no+modes\n"]);
        assert!(!provider.is_closed());
    }

    #[test]
    fn test_double_resolution() {
        let pending: Arc<Mutex<Option<Response<()>>>> = Arc::default();
        let slot = Arc::clone(&pending);
        let (provider, mut rx) = start(MetadataProvider::builder().on_notify_session_close(
            move |_, response| {
                *slot.lock() = Some(response);
            },
        ));
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n8|NSC|S|S1\n").unwrap();
        drain(&mut rx);

        let response = pending.lock().take().unwrap();
        response.success(()).unwrap();
        assert!(matches!(
            response.error(Exception::generic("again")),
            Err(AdapterError::AlreadyResolved)
        ));
        assert_eq!(drain(&mut rx), vec!["8|NSC|V\n"]);
    }

    #[test]
    fn test_requests_before_init_are_fatal() {
        let (provider, mut rx) = start(MetadataProvider::builder());
        assert!(matches!(
            feed(&provider, "2|GIS|S|bob|S|a|S|S1\n"),
            Err(AdapterError::UnexpectedBeforeInit("GIS"))
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_duplicate_init_is_fatal() {
        let (provider, _rx) = started_defaults();
        assert!(matches!(
            feed(&provider, "2|MPI|S|ARI.version|S|1.8.2\n"),
            Err(AdapterError::DuplicateInit)
        ));
    }

    #[test]
    fn test_init_handler_and_error() {
        let (provider, mut rx) = start(MetadataProvider::builder().on_init(|params, response| {
            assert_eq!(params.get("adapters_conf.id"), Some(&Some("DEMO".to_string())));
            assert!(!params.contains_key("ARI.version"));
            response
                .error(Exception::new(ExceptionKind::Metadata, "bad conf"))
                .unwrap();
        }));
        feed(
            &provider,
            "1|MPI|S|ARI.version|S|1.8.2|S|adapters_conf.id|S|DEMO\n",
        )
        .unwrap();
        assert_eq!(drain(&mut rx), vec!["1|MPI|EM|bad+conf\n"]);
    }

    #[tokio::test]
    async fn test_legacy_init_sends_no_reply() {
        let (provider, mut rx) = start(MetadataProvider::builder());
        feed(&provider, "1|MPI|S|adapters_conf.id|S|DEMO\n").unwrap();
        feed(&provider, "2|NSC|S|S1\n").unwrap();
        assert_eq!(drain(&mut rx), vec!["2|NSC|V\n"]);
        provider.shutdown();
    }

    #[test]
    fn test_close_and_shutdown() {
        let (provider, mut rx) = started_defaults();
        let err = feed(&provider, "0|CLOSE|S|reason|S|bye\n").unwrap_err();
        assert!(matches!(err, AdapterError::PeerClosed(ref r) if r == "bye"));
        assert!(provider.is_closed());
        assert!(matches!(
            feed(&provider, "3|NSC|S|S1\n"),
            Err(AdapterError::SessionClosed)
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_resolution_after_close_writes_nothing() {
        let pending: Arc<Mutex<Option<Response<Vec<String>>>>> = Arc::default();
        let slot = Arc::clone(&pending);
        let (provider, mut rx) = start(MetadataProvider::builder().on_get_items(
            move |_, response| {
                *slot.lock() = Some(response);
            },
        ));
        feed(&provider, "1|MPI|S|ARI.version|S|1.8.2\n2|GIS|S|#|S|g|S|S1\n").unwrap();
        drain(&mut rx);

        provider.shutdown();
        let response = pending.lock().take().unwrap();
        assert!(matches!(
            response.success(vec!["a".to_string()]),
            Err(AdapterError::SessionClosed)
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_keepalive_accepted_before_init() {
        let (provider, mut rx) = start(MetadataProvider::builder());
        feed(&provider, "KEEPALIVE\n").unwrap();
        assert_eq!(provider.phase(), Phase::AwaitingInit);
        assert!(drain(&mut rx).is_empty());
    }
}
