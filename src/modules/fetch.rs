use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde_json::{json, Value};

use crate::modules::evm::initial_contract;
use crate::modules::format::strip_0x_str;
use crate::modules::types::{Addr, Contract, ContractCode, Expr, RuntimeCodeStruct, W256};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BlockNumber {
  Latest,
  BlockNumber(W256),
}

#[derive(Debug, Clone)]
pub enum RpcQuery {
  QueryCode(Addr),
  QueryBalance(Addr),
  QueryNonce(Addr),
  QuerySlot(Addr, W256),
  QueryChainId,
}

fn rpc(method: &str, args: Vec<Value>) -> Value {
  json!({
      "jsonrpc": "2.0",
      "id": 1,
      "method": method,
      "params": args
  })
}

trait ToRPC {
  fn to_rpc(&self) -> Value;
}

impl ToRPC for BlockNumber {
  fn to_rpc(&self) -> Value {
    match self {
      BlockNumber::Latest => Value::String("latest".to_string()),
      BlockNumber::BlockNumber(n) => Value::String(format!("0x{}", n.to_hex())),
    }
  }
}

// Addresses and words share a representation, so these stay free functions.
fn addr_to_rpc(addr: Addr) -> Value {
  Value::String(format!("0x{}", hex::encode(&addr.to_be_bytes()[12..])))
}

fn word_to_rpc(w: W256) -> Value {
  Value::String(format!("0x{}", w.to_hex()))
}

fn read_word(text: &str) -> Option<W256> {
  W256::from_hex(strip_0x_str(text))
}

type FetchFn<'a> = Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Option<Value>> + Send>> + 'a>;

pub async fn fetch_query(n: BlockNumber, f: FetchFn<'_>, q: RpcQuery) -> Option<Value> {
  match q {
    RpcQuery::QueryCode(addr) => f(rpc("eth_getCode", vec![addr_to_rpc(addr), n.to_rpc()])).await,
    RpcQuery::QueryNonce(addr) => {
      f(rpc("eth_getTransactionCount", vec![addr_to_rpc(addr), n.to_rpc()])).await
    }
    RpcQuery::QueryBalance(addr) => {
      f(rpc("eth_getBalance", vec![addr_to_rpc(addr), n.to_rpc()])).await
    }
    RpcQuery::QuerySlot(addr, slot) => {
      f(rpc("eth_getStorageAt", vec![addr_to_rpc(addr), word_to_rpc(slot), n.to_rpc()])).await
    }
    RpcQuery::QueryChainId => f(rpc("eth_chainId", vec![])).await,
  }
}

pub async fn fetch_with_session(url: &str, client: &Client, req: Value) -> Option<Value> {
  let response = client.post(url).json(&req).send().await.ok()?.json::<Value>().await.ok()?;
  response.get("result").cloned()
}

fn session_fetcher<'a>(url: &'a str, client: &'a Client) -> FetchFn<'a> {
  Box::new(move |req: Value| {
    let url = url.to_string();
    let client = client.clone();
    Box::pin(async move { fetch_with_session(&url, &client, req).await })
  })
}

pub async fn fetch_contract_with_session(
  n: BlockNumber,
  url: &str,
  addr: Addr,
  client: &Client,
) -> Option<Contract> {
  let code = fetch_query(n.clone(), session_fetcher(url, client), RpcQuery::QueryCode(addr)).await?;
  let nonce =
    fetch_query(n.clone(), session_fetcher(url, client), RpcQuery::QueryNonce(addr)).await?;
  let balance =
    fetch_query(n.clone(), session_fetcher(url, client), RpcQuery::QueryBalance(addr)).await?;

  let code_bytes = hex::decode(strip_0x_str(code.as_str()?)).ok()?;
  let nonce = read_word(nonce.as_str()?)?;
  let balance = read_word(balance.as_str()?)?;

  let mut contract =
    initial_contract(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(code_bytes)));
  contract.nonce = Some(nonce.as_u64());
  contract.balance = Expr::Lit(balance);
  contract.external = true;
  Some(contract)
}

pub async fn fetch_slot_with_session(
  n: BlockNumber,
  url: &str,
  client: &Client,
  addr: Addr,
  slot: W256,
) -> Option<W256> {
  let result =
    fetch_query(n, session_fetcher(url, client), RpcQuery::QuerySlot(addr, slot)).await?;
  read_word(result.as_str()?)
}

pub async fn fetch_contract_from(n: BlockNumber, url: &str, addr: Addr) -> Option<Contract> {
  let client = Client::new();
  fetch_contract_with_session(n, url, addr, &client).await
}

pub async fn fetch_slot_from(n: BlockNumber, url: &str, addr: Addr, slot: W256) -> Option<W256> {
  let client = Client::new();
  fetch_slot_with_session(n, url, &client, addr, slot).await
}

pub async fn fetch_chain_id_from(url: &str) -> Option<W256> {
  let client = Client::new();
  let result =
    fetch_query(BlockNumber::Latest, session_fetcher(url, &client), RpcQuery::QueryChainId).await?;
  read_word(result.as_str()?)
}
