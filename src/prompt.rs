//! Request shaping: caller fields -> prompt text -> completion payload.

use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;

pub const FACT_PLACEHOLDER: &str = "{fact}";
pub const APPEAL_PLACEHOLDER: &str = "{appeal}";

/// Civil complaint drafting instruction used when no template is configured.
///
/// Kept byte for byte, including the indentation and the trailing space after
/// the form title; the upstream sees exactly this text.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "
  你是一个中国律师，你非常严谨并且精通中国现行的法律，你可以根据委托人提供的事实描述和诉求为委托人编写符合中国法律的民事起诉状，在民事起诉状中请你用清晰的逻辑描述事实缘由，如果有必要请在民事起诉状中附上相关《民法典》的规定，禁止出现已经失效的法律：合同法、民法通则等，
  请你为你的委托人按照如下的格式写一份民事起诉状：民事起诉状 
原告：×××，男/女，××××年××月××日生，×族，……(写明工作单位和职务或职业)，住……。联系方式：……。
法定代理人/指定代理人：×××，……。
委托诉讼代理人：×××，……。
被告：×××，……。
……
(以上写明当事人和其他诉讼参加人的姓名或者名称等基本信息)
诉讼请求：
……
事实和理由：
……
证据和证据来源，证人姓名和住所：
……
此致
××××人民法院
起诉人(签名)
××××年××月××日
以下是你的委托人提供的资料：

  事实描述：
  {fact}

  诉求：
  {appeal}
  ";

/// Inbound body of `POST /api/generateIndictment`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndictmentRequest {
    pub fact: String,
    pub appeal: String,
}

/// Substitute `fact` and `appeal` into `template`.
///
/// Single pass over the template: placeholder text inside the substituted
/// values is never expanded again.
#[must_use]
pub fn render_prompt(template: &str, request: &IndictmentRequest) -> String {
    let mut out = String::with_capacity(template.len() + request.fact.len() + request.appeal.len());
    let mut rest = template;

    while let Some(pos) = memchr::memchr(b'{', rest.as_bytes()) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        if let Some(after) = tail.strip_prefix(FACT_PLACEHOLDER) {
            out.push_str(&request.fact);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(APPEAL_PLACEHOLDER) {
            out.push_str(&request.appeal);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Upstream completion request body. `stream` and `n` are fixed.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub max_tokens: u32,
    stream: bool,
    n: u32,
}

impl CompletionPayload {
    #[must_use]
    pub fn new(upstream: &UpstreamConfig, prompt: String) -> Self {
        Self {
            model: upstream.model.clone(),
            prompt,
            temperature: upstream.temperature,
            top_p: upstream.top_p,
            frequency_penalty: upstream.frequency_penalty,
            presence_penalty: upstream.presence_penalty,
            max_tokens: upstream.max_tokens,
            stream: true,
            n: 1,
        }
    }

    /// Serialize to the request body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for this shape.
    pub fn to_body(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(bytes::Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fact: &str, appeal: &str) -> IndictmentRequest {
        IndictmentRequest {
            fact: fact.to_string(),
            appeal: appeal.to_string(),
        }
    }

    #[test]
    fn test_default_template_interpolates_both_fields() {
        let prompt = render_prompt(
            DEFAULT_PROMPT_TEMPLATE,
            &request("房东拒不退还押金", "退还押金5000元"),
        );
        assert!(prompt.contains("\n  事实描述：\n  房东拒不退还押金\n"));
        assert!(prompt.ends_with("\n  诉求：\n  退还押金5000元\n  "));
        assert!(!prompt.contains(FACT_PLACEHOLDER));
        assert!(!prompt.contains(APPEAL_PLACEHOLDER));
    }

    #[test]
    fn test_default_template_layout_is_preserved() {
        assert!(DEFAULT_PROMPT_TEMPLATE.starts_with("\n  你是一个中国律师，"));
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("写一份民事起诉状：民事起诉状 \n原告："));
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("\n  请你为你的委托人"));
        assert!(DEFAULT_PROMPT_TEMPLATE.ends_with("\n  诉求：\n  {appeal}\n  "));
    }

    #[test]
    fn test_placeholders_in_values_are_not_expanded() {
        let prompt = render_prompt("[{fact}|{appeal}]", &request("{appeal}", "{fact}"));
        assert_eq!(prompt, "[{appeal}|{fact}]");
    }

    #[test]
    fn test_other_braces_are_kept() {
        let prompt = render_prompt("{x} {fact} {", &request("F", "A"));
        assert_eq!(prompt, "{x} F {");
    }

    #[test]
    fn test_payload_shape() {
        let payload = CompletionPayload::new(&UpstreamConfig::default(), "p".to_string());
        let json: serde_json::Value = serde_json::from_slice(&payload.to_body().unwrap()).unwrap();
        assert_eq!(json["model"], "text-davinci-003");
        assert_eq!(json["prompt"], "p");
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["top_p"], 1.0);
        assert_eq!(json["frequency_penalty"], 0.0);
        assert_eq!(json["presence_penalty"], 0.0);
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["stream"], true);
        assert_eq!(json["n"], 1);
        assert_eq!(json.as_object().unwrap().len(), 9);
    }
}
