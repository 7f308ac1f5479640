use criterion::{black_box, criterion_group, criterion_main, Criterion};

use indictment_relay::prompt::{render_prompt, IndictmentRequest, DEFAULT_PROMPT_TEMPLATE};
use indictment_relay::stream::{SseMessage, SseParser, StreamTransform, TransformOutcome};

fn completion_stream(deltas: usize) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("data: {\"choices\":[{\"text\":\"\\n\\n\",\"index\":0}]}\n\n");
    for i in 0..deltas {
        body.push_str(&format!(
            "data: {{\"id\":\"cmpl-1\",\"object\":\"text_completion\",\"choices\":[{{\"text\":\"第{i}条\",\"index\":0,\"logprobs\":null,\"finish_reason\":null}}],\"model\":\"text-davinci-003\"}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn run_relay(chunks: &[&[u8]]) -> usize {
    let mut parser = SseParser::new();
    let mut transform = StreamTransform::default();
    let mut decoded: Vec<SseMessage> = Vec::with_capacity(8);
    let mut bytes = 0;
    for chunk in chunks {
        parser.feed_bytes_into(chunk, &mut decoded);
        for message in decoded.drain(..) {
            match transform.apply(message).expect("well-formed delta") {
                TransformOutcome::Emit(text) => bytes += text.len(),
                TransformOutcome::Close => return bytes,
                TransformOutcome::Suppressed | TransformOutcome::Ignored => {}
            }
        }
    }
    bytes
}

fn bench_decode_transform(c: &mut Criterion) {
    let body = completion_stream(256);

    c.bench_function("relay_decode_transform_single_chunk_256", |b| {
        let chunks = [body.as_slice()];
        b.iter(|| black_box(run_relay(black_box(&chunks))));
    });

    // Typical TCP read sizes cut frames and multi-byte characters.
    c.bench_function("relay_decode_transform_1400b_chunks_256", |b| {
        let chunks: Vec<&[u8]> = body.chunks(1400).collect();
        b.iter(|| black_box(run_relay(black_box(&chunks))));
    });

    c.bench_function("relay_decode_transform_7b_chunks_256", |b| {
        let chunks: Vec<&[u8]> = body.chunks(7).collect();
        b.iter(|| black_box(run_relay(black_box(&chunks))));
    });
}

fn bench_render_prompt(c: &mut Criterion) {
    let request = IndictmentRequest {
        fact: "2023年3月1日，原告与被告签订房屋租赁合同，约定押金5000元。".repeat(8),
        appeal: "判令被告退还押金5000元并承担诉讼费用。".to_string(),
    };
    c.bench_function("render_default_prompt", |b| {
        b.iter(|| black_box(render_prompt(black_box(DEFAULT_PROMPT_TEMPLATE), &request)));
    });
}

criterion_group!(benches, bench_decode_transform, bench_render_prompt);
criterion_main!(benches);
