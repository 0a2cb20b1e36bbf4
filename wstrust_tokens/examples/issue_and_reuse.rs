use std::{
    convert::TryFrom,
    error,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use aliri_clock::{Clock, DurationSecs, System};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use wstrust::{
    ns::Operation,
    transport::{TrustRequest, TrustTransport},
    xml::XmlElement,
    StsClient, StsClientConfig, TokenRequestParams, TokenStatus,
};
use wstrust_tokens::{stores::FileTokenStore, MessageContext, RetrievalConfig, TokenRetriever};

#[derive(Debug, Parser)]
struct Opts {
    /// The address the requested tokens apply to
    #[arg(short, long, env, default_value = "https://api.example.com/orders")]
    applies_to: String,

    /// The directory used to cache issued tokens
    #[arg(short = 'd', long, env, default_value = ".wstrust-tokens")]
    store_dir: PathBuf,

    /// The lifetime, in seconds, of tokens issued by the loopback token service
    #[arg(short, long, env, default_value_t = 30)]
    lifetime_secs: u64,

    /// The number of requests to make
    #[arg(short = 'n', long, env, default_value_t = 10)]
    requests: u32,

    /// The delay, in seconds, between requests
    #[arg(long, env, default_value_t = 5)]
    interval_secs: u64,
}

/// An in-process token service answering issue, renew, and cancel requests
#[derive(Debug)]
struct LoopbackSts {
    lifetime_secs: u64,
    serial: AtomicU64,
}

impl LoopbackSts {
    fn token_response(&self) -> Result<XmlElement, Box<dyn error::Error + Send + Sync + 'static>> {
        let now = System.now().0;
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);

        Ok(XmlElement::parse(&format!(
            r#"<wst:RequestSecurityTokenResponse
                   xmlns:wst="http://docs.oasis-open.org/ws-sx/ws-trust/200512"
                   xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
                 <wst:RequestedSecurityToken>
                   <saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_loopback-{now}-{serial}"/>
                 </wst:RequestedSecurityToken>
                 <wst:Lifetime>
                   <wsu:Created>{created}</wsu:Created>
                   <wsu:Expires>{expires}</wsu:Expires>
                 </wst:Lifetime>
               </wst:RequestSecurityTokenResponse>"#,
            now = now,
            serial = serial,
            created = xsd_date_time(now),
            expires = xsd_date_time(now + self.lifetime_secs),
        ))?)
    }
}

#[async_trait]
impl TrustTransport for LoopbackSts {
    async fn invoke(
        &self,
        request: TrustRequest,
    ) -> Result<XmlElement, Box<dyn error::Error + Send + Sync + 'static>> {
        tracing::debug!(operation = ?request.operation, action = %request.action, "loopback token service received request");

        match request.operation {
            Operation::Issue | Operation::Renew => self.token_response(),
            Operation::Cancel => Ok(XmlElement::parse(
                r#"<wst:RequestSecurityTokenResponse xmlns:wst="http://docs.oasis-open.org/ws-sx/ws-trust/200512"><wst:RequestedTokenCancelled/></wst:RequestSecurityTokenResponse>"#,
            )?),
            Operation::Validate => Err("validation is not offered by the loopback token service".into()),
        }
    }
}

fn xsd_date_time(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let transport = Arc::new(LoopbackSts {
        lifetime_secs: opts.lifetime_secs,
        serial: AtomicU64::new(0),
    });

    let client = StsClient::new(
        StsClientConfig::new().with_location("urn:wstrust:loopback"),
        transport,
    );

    let retriever = TokenRetriever::new(
        Arc::new(client),
        Arc::new(FileTokenStore::new(opts.store_dir)),
    )
    .with_config(RetrievalConfig::new().with_imminent_expiry(DurationSecs(10)));

    let params = TokenRequestParams::new().with_applies_to(opts.applies_to);

    let mut interval = tokio::time::interval(Duration::from_secs(opts.interval_secs));
    for _ in 0..opts.requests {
        interval.tick().await;

        let token = retriever
            .retrieve(&params, &mut MessageContext::new())
            .await?;

        let status = token.token_status_at(
            System.now(),
            retriever.config().imminent_expiry(),
        );
        match status {
            TokenStatus::Fresh => tracing::info!(
                token.id = %token.id(),
                expires = token.expires().map(|e| e.0),
                ?status,
                "using token"
            ),
            TokenStatus::Stale | TokenStatus::Expired => tracing::warn!(
                token.id = %token.id(),
                expires = token.expires().map(|e| e.0),
                ?status,
                "using token"
            ),
        }
    }

    Ok(())
}
