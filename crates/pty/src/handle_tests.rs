use super::*;
use std::time::Duration;

async fn collect_until_exit(rx: &mut mpsc::Receiver<BackendEvent>) -> (Vec<u8>, ExitRecord) {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(BackendEvent::Data(chunk))) => out.extend_from_slice(&chunk),
            Ok(Some(BackendEvent::Exit(record))) => return (out, record),
            Ok(None) => panic!("channel closed before exit event"),
            Err(_) => panic!("timed out waiting for pty events"),
        }
    }
}

#[tokio::test]
async fn echoes_output_and_emits_clean_exit() {
    let env = BTreeMap::new();
    let (handle, mut rx) = start("/bin/sh", &["-c".to_string(), "printf hi".to_string()], &env, None, 80, 24)
        .expect("spawn succeeds");

    let (output, exit) = collect_until_exit(&mut rx).await;
    assert!(String::from_utf8_lossy(&output).contains("hi"));
    assert_eq!(exit.code, Some(0));
    assert_eq!(exit.signal, None);
    handle.close();
}

#[tokio::test]
async fn nonzero_exit_code_is_reported() {
    let env = BTreeMap::new();
    let (_handle, mut rx) = start("/bin/sh", &["-c".to_string(), "exit 3".to_string()], &env, None, 80, 24)
        .expect("spawn succeeds");

    let (_output, exit) = collect_until_exit(&mut rx).await;
    assert_eq!(exit.code, Some(3));
}

#[tokio::test]
async fn write_after_close_is_dropped_silently() {
    let env = BTreeMap::new();
    let (handle, mut rx) = start("/bin/sh", &["-c".to_string(), "sleep 1".to_string()], &env, None, 80, 24)
        .expect("spawn succeeds");

    handle.close();
    // Should not panic or block; the write is simply discarded.
    handle.write(Bytes::from_static(b"ignored"));

    let (_output, exit) = collect_until_exit(&mut rx).await;
    assert_eq!(exit.code, Some(0));
}
