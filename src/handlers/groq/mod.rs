//! Groq backed demo routes. Text extraction from uploaded documents and the
//! medical agent go through Gemini; everything else is a Groq chat
//! completion.

mod archive;
mod faq;
mod ocr;
mod stream;
mod transcribe;

pub use archive::{medical_agent_handler, medical_archive_handler};
pub use faq::faq_handler;
pub use ocr::{extract_text_handler, ocr_handler};
pub use stream::stream_handler;
pub use transcribe::transcribe_handler;

/// Documents accepted by the OCR and extract-text routes.
const DOCUMENT_MIME_TYPES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "application/pdf",
];

const UNSUPPORTED_FILE: &str = "نوع الملف غير مدعوم حالياً";
const MISSING_FILE: &str = "يرجى رفع ملف";
const FILE_TOO_LARGE: &str = "حجم الملف كبير جداً";

const DEMO_SYSTEM_PROMPT: &str = "أنت مستشار أعمال سعودي لشركة Bright AI. هدفك تقديم مخرجات عملية ومختصرة لصناع القرار.

قواعد صارمة:
- اكتب بالعربية الفصحى وبلهجة سعودية احترافية.
- لا تذكر معلومات حساسة أو أسعار.
- أجب في نقاط واضحة (5 إلى 7 نقاط كحد أقصى).
- اختم بجملة تحفّز على تجربة أعمق أو استشارة تنفيذية.";

const OCR_SYSTEM_PROMPT: &str = "أنت خبير استخراج بيانات من نص OCR. المطلوب: تحويل النص إلى JSON منسق فقط بدون أي شرح.

قواعد الإخراج:
- أعِد JSON فقط بصيغة كائن.
- المفاتيح الأساسية: document_type, invoice_number, total_amount, tax_amount, date, vendor_name, currency, items.
- items مصفوفة من كائنات تحتوي: name, quantity, price.
- اترك القيم الفارغة null إذا لم تتوفر.";

const FAQ_SYSTEM_PROMPT: &str = r#"أنت محرر محتوى سعودي. استخرج أسئلة وأجوبة قصيرة بناءً على السياق.
أعد المخرجات بصيغة JSON فقط على شكل مصفوفة من العناصر:
[
  {"question": "...", "answer": "..."}
]
القواعد:
- 3 إلى 5 أسئلة كحد أقصى.
- إجابة قصيرة من جملة إلى جملتين.
- بدون مبالغة أو وعود."#;

const ARCHIVE_EXTRACT_PROMPT: &str = "أنت مساعد أرشفة طبية لمستشفى سعودي. حوّل التقرير الطبي إلى سجل منظم.
أعد JSON فقط بصيغة كائن يحتوي المفاتيح:
patient_name, patient_age, patient_gender, diagnosis, icd10_codes, medications, allergies, lab_results, vital_signs, procedures, follow_up, summary.
- القوائم مصفوفات نصية.
- اترك القيم غير المتوفرة null.
- لا تخترع معلومات غير موجودة في التقرير.";

const ARCHIVE_SEARCH_PROMPT: &str = "أنت محرك بحث دلالي في أرشيف طبي. أجب عن سؤال المستخدم من السجلات المرفقة فقط.
أعد JSON فقط بصيغة كائن يحتوي:
answer (نص عربي مختصر), matches (مصفوفة من record_id مع سبب المطابقة reason), confidence (رقم من 0 إلى 1).
- إذا لم توجد سجلات مطابقة أعد matches فارغة.";

const ARCHIVE_INSIGHTS_PROMPT: &str = "أنت محلل بيانات صحية وتشغيلية لمستشفى سعودي. حلّل السجلات المرفقة.
أعد JSON فقط بصيغة كائن يحتوي:
kpis (كائن مؤشرات رقمية), alerts (مصفوفة نصوص), recommendations (مصفوفة نصوص), trends (مصفوفة نصوص).
- ركّز على الأنماط المتكررة والمخاطر والتحسينات التشغيلية.";

const AGENT_SYSTEM_PROMPT: &str = "أنت وكيل ذكي للأرشيف الطبي في مستشفى سعودي. أجب عن سؤال الإدارة اعتماداً على السجلات وتقرير الدفعة وملف المستشفى.
أعد JSON فقط بصيغة كائن يحتوي:
answer (نص عربي مختصر), actions (مصفوفة خطوات تنفيذية), risks (مصفوفة نصوص), priority (منخفضة أو متوسطة أو عالية).
- لا تقدم تشخيصاً طبياً نهائياً.
- لا تخترع أرقاماً غير موجودة في البيانات.";
