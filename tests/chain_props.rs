//! Property tests for the chain ordering invariants.

use apigate::components::ComponentRegistry;
use apigate::error::{ConfigurationParseError, PolicyError};
use apigate::policy::{
    Policy, PolicyConfig, PolicyContext, PolicyVerdict, PolicyWithConfig, RequestChain,
    ResponseChain,
};
use apigate::types::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<usize>>>;

struct NumberedPolicy {
    index: usize,
    log: Log,
}

#[async_trait]
impl Policy for NumberedPolicy {
    fn parse_config(&self, _raw: &str) -> Result<PolicyConfig, ConfigurationParseError> {
        Ok(Arc::new(()))
    }

    async fn apply_to_request(
        &self,
        _request: &mut ApiRequest,
        _context: &mut PolicyContext,
        _config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError> {
        self.log.lock().unwrap().push(self.index);
        Ok(PolicyVerdict::Continue)
    }

    async fn apply_to_response(
        &self,
        _response: &mut ApiResponse,
        _context: &mut PolicyContext,
        _config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError> {
        self.log.lock().unwrap().push(self.index);
        Ok(PolicyVerdict::Continue)
    }
}

fn numbered_policies(n: usize, log: &Log) -> Vec<PolicyWithConfig> {
    (0..n)
        .map(|index| PolicyWithConfig {
            policy: Arc::new(NumberedPolicy {
                index,
                log: log.clone(),
            }),
            config: Arc::new(()),
        })
        .collect()
}

fn context() -> PolicyContext {
    PolicyContext::new(Arc::new(ComponentRegistry::new()))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// The response chain visits policies in exactly the reverse of the
    /// request chain's order, for any chain length.
    #[test]
    fn response_order_is_reverse_of_request_order(n in 0usize..16) {
        runtime().block_on(async move {
            let log: Log = Default::default();
            let policies = numbered_policies(n, &log);

            let mut request_chain = RequestChain::new(policies.clone());
            let mut request = ApiRequest::new(Method::GET, "/things");
            request_chain.apply(&mut request, &mut context()).await.unwrap();
            let request_order = std::mem::take(&mut *log.lock().unwrap());

            let mut response_chain = ResponseChain::new(policies);
            let mut response = ApiResponse::new(200);
            response_chain.apply(&mut response, &mut context()).await.unwrap();
            let response_order = log.lock().unwrap().clone();

            let mut reversed = request_order;
            reversed.reverse();
            prop_assert_eq!(response_order, reversed);
            Ok(())
        })?;
    }

    /// Chunks written to a streaming chain come out in submission order,
    /// and the end handler fires exactly once, after the last chunk.
    #[test]
    fn chunk_order_is_preserved(chunks in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..64),
        0..16,
    )) {
        runtime().block_on(async move {
            let log: Log = Default::default();
            let mut chain = RequestChain::new(numbered_policies(2, &log));

            let seen: Arc<Mutex<Vec<Bytes>>> = Default::default();
            let ends = Arc::new(Mutex::new(0u32));
            {
                let seen = seen.clone();
                chain.body_handler(move |c| seen.lock().unwrap().push(c));
            }
            {
                let ends = ends.clone();
                chain.end_handler(move || *ends.lock().unwrap() += 1);
            }

            let mut request = ApiRequest::new(Method::POST, "/things");
            chain.apply(&mut request, &mut context()).await.unwrap();
            for chunk in &chunks {
                chain.write(Bytes::from(chunk.clone()));
            }
            chain.end();

            let expected: Vec<Bytes> = chunks.into_iter().map(Bytes::from).collect();
            prop_assert_eq!(seen.lock().unwrap().clone(), expected);
            prop_assert_eq!(*ends.lock().unwrap(), 1);
            Ok(())
        })?;
    }
}
