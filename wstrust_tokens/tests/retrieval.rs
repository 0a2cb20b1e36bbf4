use std::{
    error,
    sync::{Arc, Mutex},
};

use aliri_clock::{TestClock, UnixTime};
use async_trait::async_trait;
use tracing_test::traced_test;
use wstrust::{
    delegation::DelegationToken,
    ns::{Operation, TrustVersion},
    transport::{TrustRequest, TrustTransport},
    xml::XmlElement,
    StsClient, StsClientConfig, TokenRequestParams,
};
use wstrust_tokens::{
    stores::InMemoryTokenStore,
    MessageContext, RetrievalConfig, RetrievalError, TokenRetriever,
};

const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const SAML2: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// 2023-11-14T22:13:20Z
const NOW: UnixTime = UnixTime(1_700_000_000);
const CREATED: &str = "2023-11-14T22:13:20Z";
const FAR_FUTURE: &str = "2033-01-01T00:00:00Z";
const IN_FIVE_SECONDS: &str = "2023-11-14T22:13:25Z";

struct ScriptedSts {
    name: &'static str,
    version: TrustVersion,
    issue_expires: &'static str,
    renew_fails: bool,
    one_time_use: bool,
    operations: Mutex<Vec<Operation>>,
}

impl ScriptedSts {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            version: TrustVersion::V2005_12,
            issue_expires: FAR_FUTURE,
            renew_fails: false,
            one_time_use: false,
            operations: Mutex::new(Vec::new()),
        }
    }

    fn issuing_tokens_expiring_at(mut self, expires: &'static str) -> Self {
        self.issue_expires = expires;
        self
    }

    fn failing_renewals(mut self) -> Self {
        self.renew_fails = true;
        self
    }

    fn speaking(mut self, version: TrustVersion) -> Self {
        self.version = version;
        self
    }

    fn issuing_one_time_use_tokens(mut self) -> Self {
        self.one_time_use = true;
        self
    }

    fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    fn response(&self, id: &str, expires: &str) -> Result<XmlElement, Box<dyn error::Error + Send + Sync + 'static>> {
        let conditions = if self.one_time_use {
            "<saml2:Conditions><saml2:OneTimeUse/></saml2:Conditions>"
        } else {
            ""
        };
        let body = format!(
            r#"<wst:RequestSecurityTokenResponse xmlns:wst="{wst}" xmlns:wsu="{wsu}">
                 <wst:TokenType>http://docs.oasis-open.org/wss/oasis-wss-saml-token-profile-1.1#SAMLV2.0</wst:TokenType>
                 <wst:RequestedSecurityToken>
                   <saml2:Assertion xmlns:saml2="{saml2}" ID="{id}">{conditions}</saml2:Assertion>
                 </wst:RequestedSecurityToken>
                 <wst:Lifetime>
                   <wsu:Created>{created}</wsu:Created>
                   <wsu:Expires>{expires}</wsu:Expires>
                 </wst:Lifetime>
               </wst:RequestSecurityTokenResponse>"#,
            wst = self.version.namespace(),
            wsu = WSU,
            saml2 = SAML2,
            id = id,
            conditions = conditions,
            created = CREATED,
            expires = expires,
        );
        Ok(XmlElement::parse(&body)?)
    }
}

#[async_trait]
impl TrustTransport for ScriptedSts {
    async fn invoke(
        &self,
        request: TrustRequest,
    ) -> Result<XmlElement, Box<dyn error::Error + Send + Sync + 'static>> {
        if request.body.name().namespace() != Some(self.version.namespace()) {
            return Err("request uses an unexpected trust namespace".into());
        }

        let n = {
            let mut operations = self.operations.lock().unwrap();
            operations.push(request.operation);
            operations.len()
        };

        match request.operation {
            Operation::Issue => self.response(&format!("_{}-issued-{}", self.name, n), self.issue_expires),
            Operation::Renew if self.renew_fails => Err("renewal is not supported".into()),
            Operation::Renew => self.response(&format!("_{}-renewed-{}", self.name, n), FAR_FUTURE),
            Operation::Cancel => Ok(XmlElement::parse(&format!(
                r#"<wst:RequestSecurityTokenResponse xmlns:wst="{}"><wst:RequestedTokenCancelled/></wst:RequestSecurityTokenResponse>"#,
                self.version.namespace()
            ))?),
            Operation::Validate => Err("unexpected validate".into()),
        }
    }
}

fn client(sts: &Arc<ScriptedSts>, config: StsClientConfig) -> Arc<StsClient> {
    Arc::new(StsClient::new(
        config.with_location(format!("https://{}.example.com/trust", sts.name)),
        sts.clone(),
    ))
}

fn retriever(sts: &Arc<ScriptedSts>, config: RetrievalConfig) -> TokenRetriever<TestClock> {
    TokenRetriever::new(
        client(sts, StsClientConfig::default()),
        Arc::new(InMemoryTokenStore::new()),
    )
    .with_config(config)
    .with_clock(TestClock::new(NOW))
}

fn for_address(address: &str) -> TokenRequestParams {
    TokenRequestParams::new().with_applies_to(address)
}

fn saml_delegate(id: &str) -> DelegationToken {
    DelegationToken::Inline(format!(
        r#"<saml2:Assertion xmlns:saml2="{}" ID="{}"><saml2:Subject/></saml2:Assertion>"#,
        SAML2, id
    ))
}

#[tokio::test]
async fn fresh_token_is_reused() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/");

    let first = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    let second = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);
    assert!(retriever.store().get(first.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn tokens_are_cached_per_address() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());

    let orders = retriever
        .retrieve(&for_address("https://orders.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();
    let billing = retriever
        .retrieve(&for_address("https://billing.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();

    assert_ne!(orders.id(), billing.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);
}

#[tokio::test]
async fn addresses_share_a_token_without_address_scoped_keys() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(
        &sts,
        RetrievalConfig::default().with_cache_key_from_applies_to(false),
    );

    let orders = retriever
        .retrieve(&for_address("https://orders.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();
    let billing = retriever
        .retrieve(&for_address("https://billing.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(orders.id(), billing.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);
}

#[tokio::test]
async fn endpoint_address_stands_in_for_applies_to() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());

    let first = retriever
        .retrieve(
            &TokenRequestParams::new(),
            &mut MessageContext::new().with_endpoint_address("https://orders.example.com/"),
        )
        .await
        .unwrap();
    let second = retriever
        .retrieve(&for_address("https://orders.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);
}

#[tokio::test]
async fn token_about_to_expire_is_renewed() {
    let sts = Arc::new(ScriptedSts::new("sts").issuing_tokens_expiring_at(IN_FIVE_SECONDS));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/");

    let issued = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    let renewed = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_ne!(issued.id(), renewed.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Renew]);
    assert!(retriever.store().get(issued.id()).await.unwrap().is_none());

    let reused = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_eq!(reused.id(), renewed.id());
    assert_eq!(sts.operations().len(), 2);
}

#[tokio::test]
async fn token_outside_the_expiry_window_is_not_renewed() {
    let sts = Arc::new(ScriptedSts::new("sts").issuing_tokens_expiring_at(IN_FIVE_SECONDS));
    let retriever = retriever(
        &sts,
        RetrievalConfig::default().with_imminent_expiry(aliri_clock::DurationSecs(2)),
    );
    let params = for_address("https://orders.example.com/");

    retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(sts.operations(), vec![Operation::Issue]);
}

#[tokio::test]
#[traced_test]
async fn failed_renewal_falls_back_to_issue() {
    let sts = Arc::new(
        ScriptedSts::new("sts")
            .issuing_tokens_expiring_at(IN_FIVE_SECONDS)
            .failing_renewals(),
    );
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/");

    let stale = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    let reissued = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_ne!(stale.id(), reissued.id());
    assert_eq!(
        sts.operations(),
        vec![Operation::Issue, Operation::Renew, Operation::Issue]
    );
    assert!(logs_contain("unable to renew token, issuing new token"));
}

#[tokio::test]
async fn failed_renewal_propagates_when_reissue_is_disabled() {
    let sts = Arc::new(
        ScriptedSts::new("sts")
            .issuing_tokens_expiring_at(IN_FIVE_SECONDS)
            .failing_renewals(),
    );
    let retriever = retriever(
        &sts,
        RetrievalConfig::default().with_issue_after_failed_renew(false),
    );
    let params = for_address("https://orders.example.com/");

    let stale = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    let result = retriever.retrieve(&params, &mut MessageContext::new()).await;

    match result {
        Err(RetrievalError::RenewFailed { token_id, .. }) => assert_eq!(&*token_id, stale.id()),
        other => panic!("expected renewal failure, got {:?}", other),
    }
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Renew]);
    assert!(retriever.store().get(stale.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn disallowed_renewal_issues_a_new_token() {
    let sts = Arc::new(ScriptedSts::new("sts").issuing_tokens_expiring_at(IN_FIVE_SECONDS));
    let retriever = TokenRetriever::new(
        client(&sts, StsClientConfig::default().with_allow_renewing(false)),
        Arc::new(InMemoryTokenStore::new()),
    )
    .with_clock(TestClock::new(NOW));
    let params = for_address("https://orders.example.com/");

    retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);
}

#[tokio::test]
async fn one_time_use_token_stays_in_its_message_context() {
    let sts = Arc::new(ScriptedSts::new("sts").issuing_one_time_use_tokens());
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/");

    let mut context = MessageContext::new();
    let first = retriever.retrieve(&params, &mut context).await.unwrap();
    assert!(first.is_one_time_use());

    let again = retriever.retrieve(&params, &mut context).await.unwrap();
    assert_eq!(again.id(), first.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);

    let other = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_ne!(other.id(), first.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);
    assert!(retriever.store().get(first.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn message_scoped_caching_does_not_share_tokens() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(
        &sts,
        RetrievalConfig::default().with_cache_issued_token_in_endpoint(false),
    );
    let params = for_address("https://orders.example.com/");

    let mut context = MessageContext::new();
    let first = retriever.retrieve(&params, &mut context).await.unwrap();
    let same_message = retriever.retrieve(&params, &mut context).await.unwrap();
    let next_message = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(first.id(), same_message.id());
    assert_ne!(first.id(), next_message.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);
}

#[tokio::test]
async fn delegated_identity_reuses_its_token() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let as_alice = for_address("https://orders.example.com/").with_on_behalf_of(saml_delegate("_alice"));
    let as_bob = for_address("https://orders.example.com/").with_on_behalf_of(saml_delegate("_bob"));

    let first = retriever
        .retrieve(&as_alice, &mut MessageContext::new())
        .await
        .unwrap();
    let second = retriever
        .retrieve(&as_alice, &mut MessageContext::new())
        .await
        .unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);

    let bob = retriever
        .retrieve(&as_bob, &mut MessageContext::new())
        .await
        .unwrap();
    assert_ne!(bob.id(), first.id());

    let undelegated = retriever
        .retrieve(&for_address("https://orders.example.com/"), &mut MessageContext::new())
        .await
        .unwrap();
    assert_ne!(undelegated.id(), first.id());
    assert_ne!(undelegated.id(), bob.id());
    assert_eq!(sts.operations().len(), 3);
}

#[tokio::test]
async fn delegated_token_in_message_context_is_not_reused_for_the_caller() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let address = "https://orders.example.com/";

    let mut context = MessageContext::new();
    let alice = retriever
        .retrieve(
            &for_address(address).with_on_behalf_of(saml_delegate("_alice")),
            &mut context,
        )
        .await
        .unwrap();
    let own = retriever
        .retrieve(&for_address(address), &mut context)
        .await
        .unwrap();

    assert_ne!(own.id(), alice.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);

    let alice_again = retriever
        .retrieve(
            &for_address(address).with_on_behalf_of(saml_delegate("_alice")),
            &mut context,
        )
        .await
        .unwrap();
    assert_eq!(alice_again.id(), alice.id());
    assert_eq!(sts.operations().len(), 2);
}

#[tokio::test]
async fn message_context_is_scoped_to_the_address() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(
        &sts,
        RetrievalConfig::default().with_cache_issued_token_in_endpoint(false),
    );

    let mut context = MessageContext::new();
    let orders = retriever
        .retrieve(&for_address("https://orders.example.com/"), &mut context)
        .await
        .unwrap();
    let billing = retriever
        .retrieve(&for_address("https://billing.example.com/"), &mut context)
        .await
        .unwrap();

    assert_ne!(orders.id(), billing.id());
    assert_eq!(sts.operations(), vec![Operation::Issue, Operation::Issue]);
}

#[tokio::test]
async fn delegated_one_time_use_token_is_reused_within_its_message() {
    let sts = Arc::new(ScriptedSts::new("sts").issuing_one_time_use_tokens());
    let retriever = retriever(&sts, RetrievalConfig::default());
    let as_alice = for_address("https://orders.example.com/").with_on_behalf_of(saml_delegate("_alice"));
    let as_bob = for_address("https://orders.example.com/").with_on_behalf_of(saml_delegate("_bob"));

    let mut context = MessageContext::new();
    let first = retriever.retrieve(&as_alice, &mut context).await.unwrap();
    assert!(first.is_one_time_use());

    let again = retriever.retrieve(&as_alice, &mut context).await.unwrap();
    assert_eq!(again.id(), first.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);

    let bob = retriever.retrieve(&as_bob, &mut context).await.unwrap();
    assert_ne!(bob.id(), first.id());

    let other_message = retriever
        .retrieve(&as_alice, &mut MessageContext::new())
        .await
        .unwrap();
    assert_ne!(other_message.id(), first.id());
    assert_eq!(sts.operations().len(), 3);
    assert!(retriever.store().get(first.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn act_as_identity_reuses_its_token() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/").with_act_as(saml_delegate("_service"));

    let first = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    let second = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(sts.operations(), vec![Operation::Issue]);
}

#[tokio::test]
async fn issuer_element_selects_the_client() {
    let primary = Arc::new(ScriptedSts::new("primary"));
    let partner = Arc::new(ScriptedSts::new("partner"));
    let retriever = TokenRetriever::new(
        client(&primary, StsClientConfig::default()),
        Arc::new(InMemoryTokenStore::new()),
    )
    .with_issuer_client(
        "https://partner.example.com/trust",
        client(&partner, StsClientConfig::default()),
    )
    .with_clock(TestClock::new(NOW));

    let issuer = XmlElement::parse(
        r#"<wsa:Issuer xmlns:wsa="http://www.w3.org/2005/08/addressing">
             <wsa:Address>https://partner.example.com/trust</wsa:Address>
           </wsa:Issuer>"#,
    )
    .unwrap();

    let token = retriever
        .retrieve(
            &for_address("https://orders.example.com/").with_issuer(issuer),
            &mut MessageContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(token.issuer_address(), Some("https://partner.example.com/trust"));
    assert_eq!(partner.operations(), vec![Operation::Issue]);
    assert!(primary.operations().is_empty());
}

#[tokio::test]
async fn cancelled_token_is_evicted() {
    let sts = Arc::new(ScriptedSts::new("sts"));
    let retriever = retriever(&sts, RetrievalConfig::default());
    let params = for_address("https://orders.example.com/");

    let mut context = MessageContext::new();
    let token = retriever.retrieve(&params, &mut context).await.unwrap();

    assert!(retriever.cancel(&token, &mut context).await.unwrap());
    assert!(context.token().is_none());
    assert!(retriever.store().get(token.id()).await.unwrap().is_none());

    let replacement = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_ne!(replacement.id(), token.id());
    assert_eq!(
        sts.operations(),
        vec![Operation::Issue, Operation::Cancel, Operation::Issue]
    );
}

#[tokio::test]
async fn tokens_from_a_2005_02_issuer_are_reused_renewed_and_cancelled() {
    let sts = Arc::new(
        ScriptedSts::new("legacy")
            .speaking(TrustVersion::V2005_02)
            .issuing_tokens_expiring_at(IN_FIVE_SECONDS),
    );
    let retriever = TokenRetriever::new(
        client(&sts, StsClientConfig::default().with_version(TrustVersion::V2005_02)),
        Arc::new(InMemoryTokenStore::new()),
    )
    .with_clock(TestClock::new(NOW));
    let params = for_address("https://orders.example.com/");

    let issued = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_eq!(issued.id().as_str(), "_legacy-issued-1");
    assert_eq!(issued.expires(), Some(UnixTime(1_700_000_005)));

    let renewed = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_eq!(renewed.id().as_str(), "_legacy-renewed-2");

    let reused = retriever
        .retrieve(&params, &mut MessageContext::new())
        .await
        .unwrap();
    assert_eq!(reused.id(), renewed.id());

    let mut context = MessageContext::new();
    assert!(retriever.cancel(&reused, &mut context).await.unwrap());
    assert_eq!(
        sts.operations(),
        vec![Operation::Issue, Operation::Renew, Operation::Cancel]
    );
}
