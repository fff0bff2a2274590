//! In this example, we replay the register self-test against an endpoint. Pass a connection
//! string like `ipbustcp-2.0://raven1:60002` to talk to hardware, or nothing to start a local
//! endpoint on the loopback interface and test against that.

use fpgabus::prelude::*;
use ipbus::{
    endpoint::SparseMemory,
    server::Server,
};
use std::{
    env,
    net::TcpListener,
    thread,
};

const REG: u32 = 0x6000_0000;

fn table() -> anyhow::Result<AddressTable> {
    Ok(AddressTable::try_from(vec![
        RegisterDescriptor::new("REG", REG),
        RegisterDescriptor::new("REGMASK", REG).with_mask(0x0f0f_0f0f)?,
        RegisterDescriptor::new("MEM", 0x6000_1000).incremental(1024)?,
        RegisterDescriptor::new("FIFO", 0x6000_2000).non_incremental(),
    ])?)
}

fn selftest<T>(session: Session<T>) -> anyhow::Result<()>
where
    T: Transport,
{
    let hw = session.into_shared();
    let reg = Node::new(&hw, "REG")?;
    let regmask = Node::new(&hw, "REGMASK")?;
    let mem = Node::new(&hw, "MEM")?;
    let fifo = Node::new(&hw, "FIFO")?;

    reg.write(77)?;
    let value = reg.read()?;
    reg.dispatch()?;
    println!("REG {} expect:77", value.value()?);

    mem.write_block(&[1, 2, 3, 4])?;
    let block = mem.read_block(4)?;
    mem.dispatch()?;
    println!("MEM {:?} expect:[1, 2, 3, 4]", block.value()?);

    fifo.write_block(&[1, 2, 3, 4])?;
    let block = fifo.read_block(4)?;
    fifo.dispatch()?;
    println!("FIFO {:?} expect:[4, 4, 4, 4]", block.value()?);

    reg.write(0x0123_4567)?;
    let reg1 = reg.read()?;
    let reg1m = regmask.read()?;
    regmask.write(0x090b_0d0f)?;
    let reg2 = reg.read()?;
    let reg2m = regmask.read()?;
    reg.write(0x8765_4321)?;
    let reg3 = reg.read()?;
    let reg3m = regmask.read()?;
    reg.dispatch()?;
    println!("reg1  {:#010x} expect:0x01234567", reg1.value()?);
    println!("reg1m {:#010x} expect:0x01030507", reg1m.value()?);
    println!("reg2  {:#010x} expect:0x092b4d6f", reg2.value()?);
    println!("reg2m {:#010x} expect:0x090b0d0f", reg2m.value()?);
    println!("reg3  {:#010x} expect:0x87654321", reg3.value()?);
    println!("reg3m {:#010x} expect:0x07050301", reg3m.value()?);

    // RMWs go by address, so they need the session itself
    let mut session = hw.lock().map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
    session.write("REG", 0x0123_4567)?;
    let reg1 = session.read("REG")?;
    let _ = session.rmw_bits(REG, 0xffff_0000, 0x1111_1111);
    let reg2 = session.read("REG")?;
    session.dispatch()?;
    println!("reg1  {:#010x} expect:0x01234567", reg1.value()?);
    println!("reg2  {:#010x} expect:0x11331111", reg2.value()?);

    session.write("REG", 0x0123_4567)?;
    let reg1 = session.read("REG")?;
    let _ = session.rmw_sum(REG, 1);
    let reg2 = session.read("REG")?;
    session.dispatch()?;
    println!("reg1  {:#010x} expect:0x01234567", reg1.value()?);
    println!("reg2  {:#010x} expect:0x01234568", reg2.value()?);
    Ok(())
}

/// Serve a fresh register space over TCP from a background thread, returning its URI
fn local_endpoint() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let server = Server::new(SparseMemory::new());
    thread::spawn(move || server.serve_tcp(&listener));
    Ok(format!("ipbustcp-2.0://{}:{}", addr.ip(), addr.port()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let uri = match env::args().nth(1) {
        Some(uri) => uri,
        None => local_endpoint()?,
    };
    selftest(connect(&uri, table()?, SessionConfig::default())?)
}
