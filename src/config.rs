//! Engine Configuration
//!
//! Tunables for retrieval, validation and classification plus the domain
//! vocabulary. The vocabulary is an immutable value handed to the engine at
//! construction; callers that need different domains or keyword sets build
//! their own instead of mutating shared state.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// One business domain: a display name, the keywords that identify it
/// directly, and the looser concept terms used as a fallback signal and for
/// query expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
}

/// Keyword tables driving intent classification and schema description.
///
/// All matching is done against the lowercased input, so ASCII entries here
/// must be lowercase. CJK entries are matched as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainVocabulary {
    pub domains: Vec<DomainEntry>,
    pub statistical_terms: Vec<String>,
    pub detail_terms: Vec<String>,
    pub relational_terms: Vec<String>,
    pub temporal_terms: Vec<String>,
    /// Tokens whose presence means the question likely spans multiple tables.
    pub relation_indicators: Vec<String>,
    /// Statement keywords rejected outright during SQL validation.
    pub forbidden_keywords: Vec<String>,
    pub time_tokens: Vec<String>,
    pub amount_tokens: Vec<String>,
    pub status_tokens: Vec<String>,
    /// Column-name suffixes treated as references to other tables.
    pub reference_suffixes: Vec<String>,
}

impl DomainVocabulary {
    /// The built-in bilingual (Chinese/English) vocabulary.
    pub fn builtin() -> Self {
        BUILTIN_VOCABULARY.clone()
    }

    pub fn domain(&self, name: &str) -> Option<&DomainEntry> {
        self.domains.iter().find(|d| d.name == name)
    }
}

impl Default for DomainVocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

fn terms(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn domain(name: &str, keywords: &[&str], concepts: &[&str]) -> DomainEntry {
    DomainEntry {
        name: name.to_string(),
        keywords: terms(keywords),
        concepts: terms(concepts),
    }
}

lazy_static! {
    static ref BUILTIN_VOCABULARY: DomainVocabulary = DomainVocabulary {
        domains: vec![
            domain(
                "用户管理",
                &["用户", "账户", "账号", "会员", "user", "account", "member", "customer"],
                &["注册", "登录", "昵称", "手机号", "registration", "login", "profile"],
            ),
            domain(
                "订单管理",
                &["订单", "下单", "order"],
                &["支付", "交易", "购买", "payment", "transaction", "purchase"],
            ),
            domain(
                "商品管理",
                &["商品", "产品", "货品", "product", "goods", "sku"],
                &["库存", "分类", "价格", "inventory", "category", "price"],
            ),
            domain(
                "车辆管理",
                &["车辆", "汽车", "加油", "司机", "vehicle", "car", "refuel", "fuel", "driver"],
                &["里程", "油耗", "保养", "行驶", "mileage", "maintenance", "trip"],
            ),
            domain(
                "财务管理",
                &["财务", "金额", "费用", "账单", "finance", "expense", "bill", "revenue"],
                &["结算", "发票", "流水", "settlement", "invoice", "ledger"],
            ),
        ],
        statistical_terms: terms(&[
            "统计", "分析", "汇总", "报表", "总数", "多少", "平均", "趋势", "排名", "占比",
            "count", "total", "sum", "average", "statistics", "trend", "rank", "compare",
        ]),
        detail_terms: terms(&[
            "详情", "明细", "列表", "查看", "查询", "显示", "detail", "list", "show", "find",
        ]),
        relational_terms: terms(&[
            "关联", "相关", "联合", "连接", "join", "related", "relationship", "linked",
        ]),
        temporal_terms: terms(&[
            "时间", "日期", "最近", "今天", "昨天", "本月", "上月", "今年", "去年",
            "time", "date", "recent", "today", "yesterday", "daily", "weekly", "monthly",
        ]),
        relation_indicators: terms(&[
            "统计", "分析", "汇总", "关联", "相关", "连接", "对比",
            "join", "related", "combine", "compare", "versus",
        ]),
        forbidden_keywords: terms(&["drop", "delete", "update", "insert", "alter", "create", "truncate"]),
        time_tokens: terms(&[
            "time", "date", "created", "updated", "modified",
            "时间", "日期", "创建", "更新", "修改",
        ]),
        amount_tokens: terms(&[
            "amount", "price", "cost", "fee", "money", "pay", "balance",
            "金额", "价格", "费用", "单价", "成本", "支付", "余额",
        ]),
        status_tokens: terms(&[
            "status", "state", "type", "flag", "状态", "类型", "标志",
        ]),
        reference_suffixes: terms(&["_id", "_no", "_code", "_key"]),
    };
}

/// Weights for the retrieval fusion score. They should sum to 1.0 so the
/// fused score stays comparable across configurations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub origin: f32,
    pub name_overlap: f32,
    pub entity_mention: f32,
    pub text_similarity: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            origin: 0.4,
            name_overlap: 0.2,
            entity_mention: 0.3,
            text_similarity: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Regenerations allowed after a failed validation. The total number of
    /// SQL generations is therefore `max_retries + 1`.
    pub max_retries: u8,
    pub retrieval_limit: usize,
    /// Concept terms appended per recognized domain when expanding queries.
    pub expansion_terms_per_domain: usize,
    pub max_expanded_queries: usize,
    /// Result count requested per expanded query.
    pub expansion_top_k: usize,
    /// Multiplier applied to scores of tables pulled in via foreign keys.
    pub relation_discount: f32,
    /// Base score for a related table that no search strategy scored itself.
    pub relation_default_score: f32,
    pub fusion: FusionWeights,
    /// Row count above which results are never rendered as a chart.
    pub max_chart_rows: usize,
    /// Rows sampled per column when deciding numeric vs text.
    pub classify_sample_rows: usize,
    /// Minimum Jaro-Winkler similarity for fuzzy table-hint resolution.
    pub hint_match_threshold: f64,
    pub vocabulary: DomainVocabulary,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retrieval_limit: 10,
            expansion_terms_per_domain: 2,
            max_expanded_queries: 3,
            expansion_top_k: 2,
            relation_discount: 0.8,
            relation_default_score: 0.5,
            fusion: FusionWeights::default(),
            max_chart_rows: 1000,
            classify_sample_rows: 5,
            hint_match_threshold: 0.85,
            vocabulary: DomainVocabulary::default(),
        }
    }
}
