use std::collections::HashMap;
use std::process::Command;
use std::{env, process};

use getopts::Options;
use log::{debug, error, info};

use sevm::modules::evm::{empty_contract, initial_contract, make_vm};
use sevm::modules::exec::exec;
use sevm::modules::feeschedule::fee_schedule;
use sevm::modules::fetch::{fetch_contract_from, fetch_slot_from, BlockNumber};
use sevm::modules::format::{hex_byte_string, strip_0x};
use sevm::modules::transactions::init_tx;
use sevm::modules::types::{
  BaseState, Choose, ContractCode, EvmError, Expr, Query, RuntimeCodeStruct, VMOpts, VMResult,
  W256,
};

#[derive(Debug, Default)]
struct Args {
  code: Option<String>,
  calldata: Option<String>,
  address: Option<String>,
  caller: Option<String>,
  origin: Option<String>,
  value: Option<String>,
  gas: Option<u64>,
  create: bool,
  rpc: Option<String>,
  block: Option<String>,
  allow_ffi: bool,
}

fn print_usage(program: &str, opts: &Options) -> ! {
  let brief = format!("Usage: {} --code HEX [options]", program);
  print!("{}", opts.usage(&brief));
  process::exit(0);
}

fn parse_args() -> Args {
  let argv: Vec<String> = env::args().collect();
  let program = argv[0].clone();

  let mut opts = Options::new();
  opts.optopt("c", "code", "runtime bytecode (hex)", "HEX");
  opts.optopt("d", "calldata", "transaction calldata (hex)", "HEX");
  opts.optopt("a", "address", "contract address (hex)", "ADDR");
  opts.optopt("", "caller", "caller address (hex)", "ADDR");
  opts.optopt("", "origin", "origin address (hex)", "ADDR");
  opts.optopt("", "value", "callvalue (hex)", "WEI");
  opts.optopt("g", "gas", "gas limit", "GAS");
  opts.optflag("", "create", "treat code as init code");
  opts.optopt("", "rpc", "fetch missing state from a node", "URL");
  opts.optopt("b", "block", "block number for rpc fetches", "NUM");
  opts.optflag("", "ffi", "allow the ffi cheatcode");
  opts.optopt("v", "verbose", "level of verbosity", "LEVEL");
  opts.optflag("h", "help", "print this help menu");

  let matches = match opts.parse(&argv[1..]) {
    Ok(m) => m,
    Err(f) => {
      eprintln!("Error: {}", f);
      print_usage(&program, &opts);
    }
  };
  if matches.opt_present("h") {
    print_usage(&program, &opts);
  }

  match matches.opt_str("v").as_deref() {
    Some("0") | Some("error") => env::set_var("RUST_LOG", "error"),
    Some("1") | Some("warn") => env::set_var("RUST_LOG", "warn"),
    Some("3") | Some("debug") => env::set_var("RUST_LOG", "debug"),
    Some("4") | Some("trace") => env::set_var("RUST_LOG", "trace"),
    _ => env::set_var("RUST_LOG", "info"),
  }

  Args {
    code: matches.opt_str("c"),
    calldata: matches.opt_str("d"),
    address: matches.opt_str("a"),
    caller: matches.opt_str("caller"),
    origin: matches.opt_str("origin"),
    value: matches.opt_str("value"),
    gas: matches.opt_str("g").and_then(|g| g.parse().ok()),
    create: matches.opt_present("create"),
    rpc: matches.opt_str("rpc"),
    block: matches.opt_str("block"),
    allow_ffi: matches.opt_present("ffi"),
  }
}

fn parse_word(s: &Option<String>) -> W256 {
  s.as_deref().and_then(W256::from_hex).unwrap_or_else(W256::zero)
}

#[tokio::main]
async fn main() {
  let args = parse_args();
  env_logger::init();

  let block = match &args.block {
    Some(b) => BlockNumber::BlockNumber(W256::from_hex(b).unwrap_or_else(W256::zero)),
    None => BlockNumber::Latest,
  };

  let address = Expr::LitAddr(parse_word(&args.address));
  let contract = match (&args.code, &args.rpc) {
    (Some(code), _) => {
      let bytes = match hex_byte_string("code", &strip_0x(code.as_bytes())) {
        Ok(b) => b,
        Err(e) => {
          error!("{}", e);
          return;
        }
      };
      if args.create {
        initial_contract(ContractCode::InitCode(bytes, Box::new(Expr::ConcreteBuf(Vec::new()))))
      } else {
        initial_contract(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)))
      }
    }
    (None, Some(url)) => {
      let addr = parse_word(&args.address);
      match fetch_contract_from(block.clone(), url, addr).await {
        Some(c) => c,
        None => {
          error!("could not fetch contract from {}", url);
          return;
        }
      }
    }
    _ => {
      error!("must provide either --code or --rpc with --address");
      return;
    }
  };

  let calldata = match &args.calldata {
    Some(d) => match hex_byte_string("calldata", &strip_0x(d.as_bytes())) {
      Ok(b) => Expr::ConcreteBuf(b),
      Err(e) => {
        error!("{}", e);
        return;
      }
    },
    None => Expr::ConcreteBuf(Vec::new()),
  };

  let gas = args.gas.unwrap_or(10_000_000);
  let opts = VMOpts {
    contract,
    other_contracts: Vec::new(),
    calldata: (calldata, Vec::new()),
    base_state: BaseState::EmptyBase,
    value: Expr::Lit(parse_word(&args.value)),
    priority_fee: W256::zero(),
    address,
    caller: Expr::LitAddr(parse_word(&args.caller)),
    origin: Expr::LitAddr(parse_word(&args.origin)),
    gas,
    gaslimit: gas,
    number: W256::zero(),
    timestamp: Expr::Lit(W256::one()),
    coinbase: Expr::LitAddr(W256::zero()),
    prev_randao: W256::zero(),
    max_code_size: W256(24576, 0),
    block_gaslimit: gas,
    gasprice: W256::zero(),
    base_fee: W256::zero(),
    schedule: fee_schedule(),
    chain_id: W256::one(),
    create: args.create,
    tx_access_list: HashMap::new(),
    allow_ffi: args.allow_ffi,
  };

  let mut vm = make_vm(opts);
  init_tx(&mut vm);
  info!("starting execution with {} gas", gas);

  let result = loop {
    match exec(&mut vm) {
      VMResult::VMFailure(EvmError::Query(q)) => match q {
        Query::PleaseFetchContract(addr) => {
          debug!("fetching contract 0x{}", addr.to_hex());
          let fetched = match &args.rpc {
            Some(url) => fetch_contract_from(block.clone(), url, addr).await,
            None => None,
          };
          vm.answer_contract(fetched.unwrap_or_else(empty_contract));
        }
        Query::PleaseFetchSlot(addr, slot) => {
          debug!("fetching slot 0x{} of 0x{}", slot.to_hex(), addr.to_hex());
          let fetched = match &args.rpc {
            Some(url) => fetch_slot_from(block.clone(), url, addr, slot).await,
            None => None,
          };
          vm.answer_slot(fetched.unwrap_or_else(W256::zero));
        }
        Query::PleaseAskSMT(cond, _) => {
          error!("symbolic branch condition in concrete execution: {}", cond);
          return;
        }
        Query::PleaseDoFFI(argv) => match argv.split_first() {
          Some((cmd, rest)) => match Command::new(cmd).args(rest).output() {
            Ok(out) => vm.answer_ffi(out.stdout),
            Err(e) => {
              error!("ffi failed: {}", EvmError::FFI(argv.clone()));
              error!("{}", e);
              return;
            }
          },
          None => {
            error!("empty ffi command");
            return;
          }
        },
      },
      VMResult::VMFailure(EvmError::Choose(Choose::PleaseChoosePath(cond))) => {
        error!("unresolved path choice in concrete execution: {}", cond);
        return;
      }
      other => break other,
    }
  };

  match &result {
    VMResult::VMSuccess(buf) => info!("execution succeeded: {}", buf),
    VMResult::VMFailure(e) => info!("execution failed: {}", e),
  }
  info!("gas used: {}", vm.tx.gaslimit.saturating_sub(vm.state.gas));
  let traces = vm.traces.format();
  if !traces.is_empty() {
    info!("traces:\n{}", traces);
  }
}
