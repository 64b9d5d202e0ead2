use super::*;
use anyhow::Context as _;
use std::io;

#[test]
fn app_error_should_carry_code_message_and_context() {
    let error = AppError::new("transfer_connect_failed", "连接传输服务失败")
        .with_context("address", "192.168.1.20:45679")
        .with_cause("connection refused");

    assert_eq!(error.code, "transfer_connect_failed");
    assert_eq!(error.message, "连接传输服务失败");
    assert_eq!(error.context.len(), 1);
    assert_eq!(error.context[0].key, "address");
    assert_eq!(error.causes, vec!["connection refused".to_string()]);
}

#[test]
fn with_cause_should_skip_blank_entries() {
    let error = AppError::new("catalog_fetch_failed", "获取目录失败")
        .with_cause("   ")
        .with_cause("timed out");
    assert_eq!(error.causes, vec!["timed out".to_string()]);
}

#[test]
fn with_source_should_capture_chain_and_type() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
    let error = AppError::new("io_error", "I/O 失败").with_source(io_err);
    assert!(
        error
            .context
            .iter()
            .any(|item| item.key == "sourceType" && item.value.contains("std::io"))
    );
    assert!(
        error
            .context
            .iter()
            .any(|item| item.key == "sourceChainDepth" && item.value == "1")
    );
    assert!(error.causes.iter().any(|cause| cause.contains("file missing")));
}

#[test]
fn from_anyhow_should_downcast_existing_app_error() {
    let original = AppError::new("discovery_send_failed", "发现广播发送失败").with_cause("denied");
    let recovered = AppError::from_anyhow(anyhow::Error::new(original.clone()));

    assert_eq!(recovered.code, "discovery_send_failed");
    assert_eq!(recovered.message, "发现广播发送失败");
    assert_eq!(recovered.causes, original.causes);
}

#[test]
fn from_anyhow_should_fall_back_to_default_code_with_chain() {
    let result: anyhow::Result<()> = (|| {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        Err::<(), io::Error>(io_err).context("读取配置失败")?;
        Ok(())
    })();

    let error = AppError::from_anyhow(result.expect_err("should fail"));
    assert_eq!(error.code, DEFAULT_CODE);
    assert!(
        error
            .causes
            .iter()
            .any(|cause| cause.contains("读取配置失败") || cause.contains("permission denied"))
    );
}

#[test]
fn result_ext_should_rewrite_code_and_append_context() {
    let failing: Result<(), io::Error> =
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
    let error = failing
        .with_code("catalog_connect_failed", "连接目录服务失败")
        .with_ctx("address", "192.168.1.20:45678")
        .expect_err("must keep the error");

    assert_eq!(error.code, "catalog_connect_failed");
    assert_eq!(error.message, "连接目录服务失败");
    assert!(
        error
            .context
            .iter()
            .any(|item| item.key == "address" && item.value == "192.168.1.20:45678")
    );
    assert!(error.causes.iter().any(|cause| cause.contains("refused")));
}

#[test]
fn public_text_should_join_visible_causes() {
    let bare = AppError::new("transfer_not_active", "当前没有进行中的传输");
    assert_eq!(bare.public_text(), "transfer_not_active: 当前没有进行中的传输");

    let with_cause = AppError::new("transfer_file_corrupt", "文件校验失败").with_cause("hash differs");
    let text = with_cause.public_text();
    assert!(text.starts_with("transfer_file_corrupt: 文件校验失败"));
    assert!(text.contains("hash differs"));
}

#[test]
fn display_should_render_code_and_message() {
    let error = AppError::new("peer_not_found", "未找到目标设备");
    assert_eq!(error.to_string(), "peer_not_found: 未找到目标设备");
}

#[test]
fn sanitize_cause_for_release_should_hide_sensitive_data() {
    assert_eq!(
        sanitize_cause_for_release("token=secret-value"),
        RELEASE_REDACTED_CAUSE
    );
    assert_eq!(
        sanitize_cause_for_release("/home/example/private/file"),
        RELEASE_REDACTED_CAUSE
    );
    assert_eq!(
        sanitize_cause_for_release("normal short message"),
        "normal short message"
    );
}

#[cfg(debug_assertions)]
#[test]
fn visible_causes_should_keep_full_chain_in_debug_builds() {
    let error = AppError::new("transfer_target_write_failed", "文件传输读写失败")
        .with_cause("first")
        .with_cause("second");
    assert_eq!(
        error.visible_causes(),
        vec!["first".to_string(), "second".to_string()]
    );
}
