//! 异步提交测试

mod common;

use std::sync::Arc;

use common::setup;
use vm_vpu::{VpuError, VpuOp};

#[tokio::test]
async fn test_async_submit_round_trip() {
    let (_sim, vpu) = setup();
    let vpu = Arc::new(vpu);
    let token = vpu.open_device().unwrap();

    let reply = vpu.submit_async(VpuOp::Init, 0, Vec::new()).await.unwrap();
    assert!(reply.handle.is_some());

    let reply = vpu.submit_async(VpuOp::Decode, 0, vec![9]).await.unwrap();
    assert_eq!(reply.data, vec![9]);

    assert_eq!(
        vpu.submit_async(VpuOp::Decode, 1, Vec::new()).await,
        Err(VpuError::InvalidTarget(1))
    );

    vpu.close_device(token);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_async_submitters() {
    let (sim, vpu) = setup();
    let vpu = Arc::new(vpu);
    let token = vpu.open_device().unwrap();
    vpu.submit_async(VpuOp::Init, 0, Vec::new()).await.unwrap();
    vpu.submit_async(VpuOp::Init, 1, Vec::new()).await.unwrap();

    let (a, b, c) = tokio::join!(
        vpu.submit_async(VpuOp::Decode, 0, vec![1]),
        vpu.submit_async(VpuOp::Decode, 1, vec![2]),
        vpu.submit_async(VpuOp::GetVersion, 0, Vec::new()),
    );
    assert_eq!(a.unwrap().data, vec![1]);
    assert_eq!(b.unwrap().data, vec![2]);
    assert!(c.is_ok());
    assert_eq!(sim.max_in_flight(), 1);

    vpu.close_device(token);
}
