//! HTML fixtures shaped like Google Scholar listing pages.

use std::ops::Range;

/// One listing entry. Even entries carry a side PDF link.
pub fn result_item(i: usize) -> String {
    let pdf = if i % 2 == 0 {
        format!(
            r#"<div class="gs_ggs gs_fl"><div class="gs_ggsd"><div class="gs_or_ggsm"><a href="https://files.example.org/{i}.pdf"><span class="gs_ctg2">[PDF]</span> example.org</a></div></div></div>"#
        )
    } else {
        String::new()
    };
    format!(
        r#"<div class="gs_r gs_or gs_scl" data-cid="cid{i}">{pdf}<div class="gs_ri">
<h3 class="gs_rt"><a id="t{i}" href="https://example.org/paper/{i}">Paper {i} on graph learning</a></h3>
<div class="gs_a">A Author{i}, B Coauthor&nbsp;- Journal of Tests, {year}&nbsp;- example.org</div>
<div class="gs_rs">Snippet for paper {i}</div>
<div class="gs_fl gs_flb"><a href="javascript:void(0)" class="gs_or_sav">Save</a> <a href="/scholar?cites={i}00&amp;hl=en">Cited by {cites}</a> <a href="/scholar?q=related:{i}">Related articles</a></div>
</div></div>"#,
        year = 2010 + (i % 10),
        cites = i * 3,
    )
}

/// A listing page holding entries for every index in `range`.
pub fn results_page(range: Range<usize>, has_next: bool) -> String {
    let items: String = range.map(result_item).collect();
    let next = if has_next {
        r#"<td align="left" nowrap><a href="/scholar?start=10&amp;q=x"><span class="gs_ico gs_ico_nav_next"></span><b>Next</b></a></td>"#
    } else {
        r#"<td align="left" nowrap><span class="gs_ico gs_ico_nav_next"></span><b style="visibility:hidden">Next</b></td>"#
    };
    format!(
        r#"<!doctype html><html><head><title>Google Scholar</title></head><body>
<div id="gs_ab_md"><div class="gs_ab_mdw">About 1,230 results (<b>0.04</b> sec)</div></div>
<div id="gs_bdy"><div id="gs_res_ccl"><div id="gs_res_ccl_mid">{items}</div>
<div id="gs_n"><center><table><tr>{next}</tr></table></center></div></div></div>
</body></html>"#
    )
}

/// The verification page served to suspected bots.
pub fn challenge_page() -> String {
    r#"<!doctype html><html><body><div id="gs_captcha_ccl"><h1>Please show you're not a robot</h1>
<form id="gs_captcha_f" method="post"><div class="g-recaptcha" data-sitekey="k"></div></form></div></body></html>"#
        .to_string()
}

/// A valid listing reporting zero matches.
pub fn empty_page() -> String {
    r#"<!doctype html><html><body><div id="gs_bdy"><div id="gs_res_ccl"><div id="gs_res_ccl_mid">
<div class="gs_r"><div class="gs_med">Your search - <b>zzqxv</b> - did not match any articles.</div></div>
</div></div></div></body></html>"#
        .to_string()
}

/// Bytes that pass the PDF sanity checks.
pub fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n%%EOF\n".to_vec()
}
