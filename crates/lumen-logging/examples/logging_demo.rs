use lumen_logging::{ExportFormat, LogAggregator, LogEntry, LogLevel, SearchOptions, TimeRange};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Lumen 日志聚合示例 ===\n");

    let aggregator = LogAggregator::default();

    aggregator
        .add_log(LogEntry::info("auth", "User signed in").with_field("user_id", serde_json::json!("u-1")))
        .await;
    aggregator
        .add_log(LogEntry::error("webhook", "Delivery failed after retries").with_field("attempt", serde_json::json!(3)))
        .await;
    aggregator.add_log(LogEntry::warn("quota", "Quota usage above 90 percent")).await;
    aggregator.add_log(LogEntry::error("convert", "Unsupported image format")).await;

    // 1. 全文搜索
    let failed = aggregator.search("failed", &SearchOptions::default()).await;
    println!("包含 'failed' 的日志: {}", failed.total);

    // 2. 按级别过滤
    let errors = aggregator
        .search("", &SearchOptions::default().level(LogLevel::Error))
        .await;
    for entry in &errors.logs {
        println!("[{}] {}: {}", entry.level, entry.component, entry.message);
    }

    // 3. 关键词索引
    println!("\n关键词 'quota': {} 条", aggregator.search_keyword("quota").await.len());

    // 4. 统计
    let stats = aggregator.get_log_stats(TimeRange::Hour).await;
    println!("最近一小时: {} 条, 按级别: {:?}", stats.total, stats.by_level);

    // 5. 导出
    println!("\nCSV 导出:\n{}", aggregator.export_logs(ExportFormat::Csv).await?);
    println!("TXT 导出:\n{}", aggregator.export_logs("txt".parse()?).await?);

    Ok(())
}
