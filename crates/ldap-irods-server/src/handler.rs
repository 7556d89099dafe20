//! LDAP request handling
//!
//! Maps decoded LDAP operations onto the authentication bridge and the
//! virtual directory, and builds the wire responses.

use crate::directory::{Entry, VirtualDirectory};
use crate::metrics::{BindOutcome, MetricsRecorder};
use ldap3_proto::proto::{
    LdapBindCred, LdapBindRequest, LdapBindResponse, LdapExtendedResponse, LdapFilter, LdapMsg,
    LdapOp, LdapPartialAttribute, LdapResult, LdapResultCode, LdapSearchRequest,
    LdapSearchResultEntry,
};
use ldap_irods_auth::AuthBridge;
use ldap_irods_core::{ErrorKind, Filter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the connection loop does with a handled message
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Send these messages, in order, and keep reading
    Reply(Vec<LdapMsg>),
    /// Stop reading and close the connection
    Close,
}

pub struct LdapHandler {
    bridge: Arc<AuthBridge>,
    directory: Arc<VirtualDirectory>,
    metrics: MetricsRecorder,
}

impl LdapHandler {
    pub fn new(
        bridge: Arc<AuthBridge>,
        directory: Arc<VirtualDirectory>,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            bridge,
            directory,
            metrics,
        }
    }

    pub async fn handle(&self, msg: LdapMsg) -> HandlerOutcome {
        let msgid = msg.msgid;
        let ops = match msg.op {
            LdapOp::BindRequest(req) => vec![self.do_bind(&req).await],
            LdapOp::SearchRequest(req) => self.do_search(&req),
            LdapOp::UnbindRequest => {
                debug!(msgid, "Unbind");
                return HandlerOutcome::Close;
            }
            LdapOp::AbandonRequest(abandoned) => {
                // requests run to completion in order, nothing to abort
                debug!(msgid, abandoned, "Abandon requested");
                vec![]
            }
            op => {
                let name = operation_name(&op);
                info!(msgid, operation = name, "Unsupported operation");
                self.metrics.record_unsupported(name);
                vec![LdapOp::ExtendedResponse(LdapExtendedResponse {
                    res: ldap_result(
                        LdapResultCode::UnwillingToPerform,
                        "operation not implemented by server",
                    ),
                    name: None,
                    value: None,
                })]
            }
        };

        HandlerOutcome::Reply(
            ops.into_iter()
                .map(|op| LdapMsg {
                    msgid,
                    op,
                    ctrl: vec![],
                })
                .collect(),
        )
    }

    async fn do_bind(&self, req: &LdapBindRequest) -> LdapOp {
        let (code, message) = self.bind_result(req).await;
        LdapOp::BindResponse(LdapBindResponse {
            res: ldap_result(code, message),
            saslcreds: None,
        })
    }

    async fn bind_result(&self, req: &LdapBindRequest) -> (LdapResultCode, &'static str) {
        #[allow(unreachable_patterns)]
        let password = match &req.cred {
            LdapBindCred::Simple(password) => password,
            _ => {
                info!(dn = %req.dn, "Unhandled bind authentication choice");
                self.metrics.record_bind(BindOutcome::Unsupported);
                return (
                    LdapResultCode::UnwillingToPerform,
                    "authentication choice not supported",
                );
            }
        };

        if req.dn.is_empty() {
            info!("Anonymous user bind");
            self.metrics.record_bind(BindOutcome::Anonymous);
            return (LdapResultCode::Success, "");
        }

        match self.bridge.authenticate(&req.dn, password).await {
            Ok(auth) => {
                info!(dn = %req.dn, user = %auth.identity, cached = auth.cached, "Bind succeeded");
                self.metrics.record_bind(BindOutcome::Success);
                (LdapResultCode::Success, "")
            }
            Err(e) if e.kind() == ErrorKind::RemoteConnectivity => {
                warn!(dn = %req.dn, error = %e, "Bind failed, iRODS unavailable");
                self.metrics.record_bind(BindOutcome::Unreachable);
                (LdapResultCode::InvalidCredentials, "invalid credentials")
            }
            Err(e) => {
                info!(dn = %req.dn, error = %e, "Bind failed");
                self.metrics.record_bind(BindOutcome::InvalidCredentials);
                (LdapResultCode::InvalidCredentials, "invalid credentials")
            }
        }
    }

    fn do_search(&self, req: &LdapSearchRequest) -> Vec<LdapOp> {
        let filter_text = render_filter(&req.filter);
        debug!(
            base = %req.base,
            filter = %filter_text,
            attrs = ?req.attrs,
            time_limit = req.timelimit,
            "Search"
        );

        let filter = Filter::parse(&filter_text);
        let entries = self.directory.search(&req.base, &filter, &req.attrs);
        self.metrics.record_search(entries.len());

        entries
            .into_iter()
            .map(|entry| {
                debug!(dn = %entry.dn, "Returning search result");
                LdapOp::SearchResultEntry(result_entry(entry))
            })
            .chain(std::iter::once(LdapOp::SearchResultDone(ldap_result(
                LdapResultCode::Success,
                "",
            ))))
            .collect()
    }
}

fn ldap_result(code: LdapResultCode, message: &str) -> LdapResult {
    LdapResult {
        code,
        matcheddn: "".to_string(),
        message: message.to_string(),
        referral: vec![],
    }
}

fn result_entry(entry: Entry) -> LdapSearchResultEntry {
    LdapSearchResultEntry {
        dn: entry.dn,
        attributes: entry
            .attributes
            .into_iter()
            .map(|(atype, value)| LdapPartialAttribute {
                atype,
                vals: vec![value.into_bytes()],
            })
            .collect(),
    }
}

fn operation_name(op: &LdapOp) -> &'static str {
    match op {
        LdapOp::ModifyRequest(_) => "modify",
        LdapOp::AddRequest(_) => "add",
        LdapOp::DelRequest(_) => "delete",
        LdapOp::ExtendedRequest(_) => "extended",
        _ => "other",
    }
}

/// Render a decoded filter back to its RFC 4515 string form
pub fn render_filter(filter: &LdapFilter) -> String {
    match filter {
        LdapFilter::And(terms) => {
            format!("(&{})", terms.iter().map(render_filter).collect::<String>())
        }
        LdapFilter::Or(terms) => {
            format!("(|{})", terms.iter().map(render_filter).collect::<String>())
        }
        LdapFilter::Not(term) => format!("(!{})", render_filter(term)),
        LdapFilter::Equality(attr, value) => format!("({}={})", attr, value),
        LdapFilter::Present(attr) => format!("({}=*)", attr),
        LdapFilter::Substring(attr, sub) => {
            let mut pattern = sub.initial.clone().unwrap_or_default();
            for part in &sub.any {
                pattern.push('*');
                pattern.push_str(part);
            }
            pattern.push('*');
            if let Some(last) = &sub.final_ {
                pattern.push_str(last);
            }
            format!("({}={})", attr, pattern)
        }
        #[allow(unreachable_patterns)]
        _ => "(objectClass=*)".to_string(),
    }
}
